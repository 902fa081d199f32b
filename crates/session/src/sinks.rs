//! Per-session sinks registered with the fan-out registries

use bytes::Bytes;
use contracts::{ContractError, DataSink, Event, RtpPacket, SessionId, StreamKind};
use tracing::{debug, instrument, trace};

use crate::peer::{CloseReason, CloseSignal};
use crate::transport::{ChannelWriter, MediaTrack};

/// Writes the shared RTP stream into one peer's media track.
///
/// Each packet is the sink's own copy; its payload type is rewritten to the
/// value negotiated with this peer.
pub struct TrackSink<Tr> {
    name: String,
    track: Tr,
    payload_type: u8,
    closer: CloseSignal,
}

impl<Tr: MediaTrack> TrackSink<Tr> {
    pub(crate) fn new(id: &SessionId, track: Tr, payload_type: u8, closer: CloseSignal) -> Self {
        Self {
            name: format!("{id}/rtp"),
            track,
            payload_type,
            closer,
        }
    }
}

impl<Tr: MediaTrack> DataSink<RtpPacket> for TrackSink<Tr> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&mut self, mut packet: RtpPacket) -> Result<(), ContractError> {
        packet.header.payload_type = self.payload_type;
        trace!(
            sink = %self.name,
            seq = packet.header.sequence_number,
            pt = self.payload_type,
            "Writing RTP to track"
        );
        self.track.write_rtp(&packet).await
    }

    async fn flush(&mut self) -> Result<(), ContractError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ContractError> {
        debug!(sink = %self.name, "Track sink closed");
        self.closer.request(CloseReason::SinkClosed(StreamKind::Rtp));
        Ok(())
    }
}

/// Writes bus events to one peer's data channel as encoded frames.
pub struct ChannelSink<W> {
    name: String,
    writer: W,
    max_frame_bytes: usize,
    closer: CloseSignal,
}

impl<W: ChannelWriter> ChannelSink<W> {
    pub(crate) fn new(id: &SessionId, writer: W, max_frame_bytes: usize, closer: CloseSignal) -> Self {
        Self {
            name: format!("{id}/events"),
            writer,
            max_frame_bytes,
            closer,
        }
    }
}

impl<W: ChannelWriter> DataSink<Event> for ChannelSink<W> {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "channel_sink_write",
        skip(self, event),
        fields(sink = %self.name, event = event.name())
    )]
    async fn write(&mut self, event: Event) -> Result<(), ContractError> {
        let frame = event.encode()?;
        if frame.len() > self.max_frame_bytes {
            return Err(ContractError::Oversized {
                what: "data channel frame",
                size: frame.len(),
                max: self.max_frame_bytes,
            });
        }
        self.writer.send(Bytes::from(frame)).await
    }

    async fn flush(&mut self) -> Result<(), ContractError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ContractError> {
        debug!(sink = %self.name, "Channel sink closed");
        let result = self.writer.close().await;
        self.closer.request(CloseReason::SinkClosed(StreamKind::Event));
        result
    }
}
