//! # Session
//!
//! 浏览器对端会话与扇出中枢。
//!
//! ## 架构
//! ```text
//! offer ──► codec::resolve_payload_type ──► Negotiator ──► answer
//!                                              │
//!                                              ▼
//!                                  PeerSession (Negotiating → Open → Closed)
//!                                     │ register            │ reader
//!                                     ▼                     ▼
//!   RTP source ──► Dispatcher ──► TrackSink         EventPublisher (bus)
//!   bus events ──► Dispatcher ──► ChannelSink
//! ```
//!
//! 真实的 WebRTC 传输通过 [`transport`] 中的 trait 接入；
//! [`loopback`] 提供进程内实现，供测试和本地调试使用。

pub mod codec;
pub mod error;
pub mod loopback;
pub mod peer;
pub mod proxy;
pub mod service;
pub mod sinks;
pub mod transport;

pub use codec::{offered_codecs, resolve_payload_type, OfferedCodec};
pub use error::SessionError;
pub use loopback::{LoopbackNegotiator, LoopbackPeer, LoopbackRemote};
pub use peer::{spawn_session, CloseReason, SessionContext, SessionHandle, SessionState};
pub use proxy::{InitiatedSession, Proxy, ProxyConfig, ProxyStats, LOG_SINK_ID};
pub use service::{
    InitiatePeerConnectionRequest, InitiatePeerConnectionResponse, LocalProxyService,
    ProxyService, StartStreamRequest, StartStreamResponse,
};
pub use sinks::{ChannelSink, TrackSink};
pub use transport::{
    ConnectionState, DataChannel, MediaTrack, NegotiatedTransport, NegotiationParams, Negotiator,
    SdpType, SessionDescription, TransportEvent,
};
