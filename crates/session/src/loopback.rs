//! In-process transport
//!
//! Pairs every negotiated session with a [`LoopbackPeer`] that plays the
//! remote browser: it receives the RTP written to the track, opens the data
//! channel, exchanges frames and reports connection states.

use bytes::Bytes;
use contracts::{ContractError, Event, RtpPacket};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::SessionError;
use crate::transport::{
    ChannelReader, ChannelWriter, ConnectionState, DataChannel, MediaTrack, NegotiatedTransport,
    NegotiationParams, Negotiator, SessionDescription, TransportEvent,
};

const CHANNEL_DEPTH: usize = 256;

/// Negotiator whose peers live in the same process
#[derive(Debug, Clone)]
pub struct LoopbackNegotiator {
    peers: mpsc::UnboundedSender<LoopbackPeer>,
}

impl LoopbackNegotiator {
    /// Each successful negotiation yields its remote side on the receiver.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LoopbackPeer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        (Self { peers }, rx)
    }
}

impl Negotiator for LoopbackNegotiator {
    type Track = LoopbackTrack;
    type Channel = LoopbackChannel;

    async fn negotiate(
        &self,
        params: NegotiationParams,
    ) -> Result<NegotiatedTransport<LoopbackTrack, LoopbackChannel>, SessionError> {
        let (rtp_tx, rtp_rx) = mpsc::channel(CHANNEL_DEPTH);
        let (events_tx, events_rx) = mpsc::channel(16);

        let answer = SessionDescription::answer(format!(
            "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n\
             m=video 9 UDP/TLS/RTP/SAVPF {pt}\r\na=rtpmap:{pt} {codec}/90000\r\na=ssrc:{ssrc}\r\n\
             m=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\n",
            pt = params.payload_type,
            codec = params.codec,
            ssrc = params.ssrc,
        ));

        let peer = LoopbackPeer {
            params,
            rtp: rtp_rx,
            events: events_tx,
        };
        self.peers
            .send(peer)
            .map_err(|_| SessionError::negotiation("loopback peer receiver dropped"))?;

        Ok(NegotiatedTransport {
            answer,
            media_track: LoopbackTrack { tx: rtp_tx },
            events: events_rx,
        })
    }
}

/// Remote side of one loopback session
#[derive(Debug)]
pub struct LoopbackPeer {
    params: NegotiationParams,
    rtp: mpsc::Receiver<RtpPacket>,
    events: mpsc::Sender<TransportEvent<LoopbackChannel>>,
}

impl LoopbackPeer {
    pub fn params(&self) -> &NegotiationParams {
        &self.params
    }

    /// Open the data channel; the session goes Open when it sees it.
    pub async fn open_data_channel(&self, label: &str) -> Result<LoopbackRemote, ContractError> {
        let (to_proxy, from_remote) = mpsc::channel(CHANNEL_DEPTH);
        let (to_remote, from_proxy) = mpsc::channel(CHANNEL_DEPTH);
        let channel = LoopbackChannel {
            label: label.to_string(),
            writer: LoopbackWriter { tx: Some(to_remote) },
            reader: LoopbackReader { rx: from_remote },
        };
        self.send(TransportEvent::DataChannelOpen(channel)).await?;
        Ok(LoopbackRemote {
            tx: Some(to_proxy),
            rx: from_proxy,
        })
    }

    pub async fn set_state(&self, state: ConnectionState) -> Result<(), ContractError> {
        self.send(TransportEvent::ConnectionStateChanged(state)).await
    }

    /// Next packet written to this peer's track.
    pub async fn recv_rtp(&mut self) -> Option<RtpPacket> {
        self.rtp.recv().await
    }

    /// Packets already delivered, without waiting.
    pub fn drain_rtp(&mut self) -> Vec<RtpPacket> {
        let mut packets = Vec::new();
        while let Ok(packet) = self.rtp.try_recv() {
            packets.push(packet);
        }
        packets
    }

    async fn send(&self, event: TransportEvent<LoopbackChannel>) -> Result<(), ContractError> {
        self.events.send(event).await.map_err(|_| ContractError::SinkClosed {
            sink_name: "loopback session".to_string(),
        })
    }
}

/// Browser end of an open data channel
#[derive(Debug)]
pub struct LoopbackRemote {
    tx: Option<mpsc::Sender<Bytes>>,
    rx: mpsc::Receiver<Bytes>,
}

impl LoopbackRemote {
    pub async fn send_event(&self, event: &Event) -> Result<(), ContractError> {
        self.send_frame(Bytes::from(event.encode()?)).await
    }

    pub async fn send_frame(&self, frame: Bytes) -> Result<(), ContractError> {
        let tx = self.tx.as_ref().ok_or_else(|| ContractError::SinkClosed {
            sink_name: "loopback remote".to_string(),
        })?;
        tx.send(frame).await.map_err(|_| ContractError::SinkClosed {
            sink_name: "loopback remote".to_string(),
        })
    }

    /// Next event sent by the proxy; `None` once the proxy closed its side.
    pub async fn recv_event(&mut self) -> Option<Result<Event, ContractError>> {
        let frame = self.rx.recv().await?;
        Some(Event::decode(&frame))
    }

    /// Close the browser side; the session's reader sees end of stream.
    pub fn close(&mut self) {
        self.tx.take();
    }
}

/// Proxy end of a loopback data channel
#[derive(Debug)]
pub struct LoopbackChannel {
    label: String,
    writer: LoopbackWriter,
    reader: LoopbackReader,
}

impl DataChannel for LoopbackChannel {
    type Writer = LoopbackWriter;
    type Reader = LoopbackReader;

    fn label(&self) -> &str {
        &self.label
    }

    fn split(self) -> (LoopbackWriter, LoopbackReader) {
        (self.writer, self.reader)
    }
}

#[derive(Debug)]
pub struct LoopbackWriter {
    tx: Option<mpsc::Sender<Bytes>>,
}

impl ChannelWriter for LoopbackWriter {
    async fn send(&mut self, frame: Bytes) -> Result<(), ContractError> {
        let closed = || ContractError::SinkClosed {
            sink_name: "loopback data channel".to_string(),
        };
        let tx = self.tx.as_ref().ok_or_else(closed)?;
        tx.send(frame).await.map_err(|_| closed())
    }

    async fn close(&mut self) -> Result<(), ContractError> {
        if self.tx.take().is_some() {
            debug!("Loopback data channel closed");
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct LoopbackReader {
    rx: mpsc::Receiver<Bytes>,
}

impl ChannelReader for LoopbackReader {
    async fn recv(&mut self) -> Result<Option<Bytes>, ContractError> {
        Ok(self.rx.recv().await)
    }
}

/// Media track that hands packets to the paired [`LoopbackPeer`]
#[derive(Debug)]
pub struct LoopbackTrack {
    tx: mpsc::Sender<RtpPacket>,
}

impl MediaTrack for LoopbackTrack {
    async fn write_rtp(&mut self, packet: &RtpPacket) -> Result<(), ContractError> {
        self.tx
            .send(packet.clone())
            .await
            .map_err(|_| ContractError::SinkClosed {
                sink_name: "loopback track".to_string(),
            })
    }
}
