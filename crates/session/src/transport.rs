//! Negotiation boundary
//!
//! The real-time transport library (ICE, DTLS, SCTP) lives behind these
//! traits. The core hands it an offer, a payload type and an SSRC, and gets
//! back an answer, a media track and a stream of lifecycle events.

use std::fmt;
use std::future::Future;

use bytes::Bytes;
use contracts::{ContractError, RtpPacket};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::SessionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// Session description as exchanged with browsers (`{"type", "sdp"}`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Peer connection state reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// `Disconnected` may still recover; `Failed` and `Closed` never do.
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Failed | ConnectionState::Closed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::New => "new",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Failed => "failed",
            ConnectionState::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle callbacks, delivered as a stream
#[derive(Debug)]
pub enum TransportEvent<C> {
    DataChannelOpen(C),
    ConnectionStateChanged(ConnectionState),
}

/// What the core asks the transport for
#[derive(Debug, Clone)]
pub struct NegotiationParams {
    pub offer: SessionDescription,
    pub codec: String,
    /// Payload type resolved from the offer for `codec`
    pub payload_type: u8,
    /// Fixed SSRC of the outbound media track
    pub ssrc: u32,
}

/// What the transport hands back
pub struct NegotiatedTransport<Tr, C> {
    pub answer: SessionDescription,
    pub media_track: Tr,
    pub events: mpsc::Receiver<TransportEvent<C>>,
}

/// Outbound media track of one peer connection
#[trait_variant::make(MediaTrack: Send)]
pub trait LocalMediaTrack {
    /// Write one packet. [`ContractError::SinkClosed`] means the track is gone.
    async fn write_rtp(&mut self, packet: &RtpPacket) -> Result<(), ContractError>;
}

/// Writing half of a data channel
#[trait_variant::make(ChannelWriter: Send)]
pub trait LocalChannelWriter {
    async fn send(&mut self, frame: Bytes) -> Result<(), ContractError>;

    async fn close(&mut self) -> Result<(), ContractError>;
}

/// Reading half of a data channel
#[trait_variant::make(ChannelReader: Send)]
pub trait LocalChannelReader {
    /// Next inbound frame; `Ok(None)` once the remote side has closed.
    async fn recv(&mut self) -> Result<Option<Bytes>, ContractError>;
}

/// An opened data channel
pub trait DataChannel: Send + 'static {
    type Writer: ChannelWriter + 'static;
    type Reader: ChannelReader + 'static;

    fn label(&self) -> &str;

    fn split(self) -> (Self::Writer, Self::Reader);
}

/// The transport-negotiation collaborator
pub trait Negotiator: Send + Sync + 'static {
    type Track: MediaTrack + 'static;
    type Channel: DataChannel;

    fn negotiate(
        &self,
        params: NegotiationParams,
    ) -> impl Future<Output = Result<NegotiatedTransport<Self::Track, Self::Channel>, SessionError>>
           + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(ConnectionState::Failed.is_terminal());
        assert!(ConnectionState::Closed.is_terminal());
        assert!(!ConnectionState::Disconnected.is_terminal());
        assert!(!ConnectionState::Connected.is_terminal());
    }

    #[test]
    fn description_json_shape() {
        let json = r#"{"type":"offer","sdp":"v=0\r\n"}"#;
        let offer: SessionDescription = serde_json::from_str(json).unwrap();
        assert_eq!(offer, SessionDescription::offer("v=0\r\n"));
        assert_eq!(serde_json::to_string(&offer).unwrap(), json);
    }
}
