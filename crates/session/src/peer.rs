//! Peer session state machine
//!
//! `Negotiating -> Open -> Closed`. Open is entered once, when the data
//! channel opens: both sinks are registered under the session id and the
//! inbound reader starts. Closed is entered once, from whichever happens
//! first: the reader stops, the transport reports a terminal state, a sink
//! is evicted, or the process shuts down.

use std::fmt;
use std::sync::Arc;

use contracts::{
    ContractError, Event, EventPublisher, RtpPacket, SessionId, SinkConfig, StreamKind,
};
use dispatcher::{SinkHandle, SinkRegistry};
use metrics::{counter, gauge};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::sinks::{ChannelSink, TrackSink};
use crate::transport::{ChannelReader, ConnectionState, DataChannel, MediaTrack, TransportEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Negotiating,
    Open,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionState::Negotiating => "negotiating",
            SessionState::Open => "open",
            SessionState::Closed => "closed",
        })
    }
}

/// Why a session left the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    DataChannelClosed,
    Connection(ConnectionState),
    TransportGone,
    SinkClosed(StreamKind),
    RegistrationFailed,
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::DataChannelClosed => f.write_str("data channel closed"),
            CloseReason::Connection(state) => write!(f, "connection {state}"),
            CloseReason::TransportGone => f.write_str("transport dropped"),
            CloseReason::SinkClosed(kind) => write!(f, "{kind} sink closed"),
            CloseReason::RegistrationFailed => f.write_str("sink registration failed"),
            CloseReason::Shutdown => f.write_str("shutdown"),
        }
    }
}

/// Lets sinks and the reader ask their session to close.
#[derive(Debug, Clone)]
pub struct CloseSignal(mpsc::UnboundedSender<CloseReason>);

impl CloseSignal {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<CloseReason>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self(tx), rx)
    }

    /// No-op once the session has already closed.
    pub fn request(&self, reason: CloseReason) {
        let _ = self.0.send(reason);
    }
}

/// Everything a session needs from the proxy
pub struct SessionContext<P> {
    pub rtp_sinks: Arc<SinkRegistry<RtpPacket>>,
    pub event_sinks: Arc<SinkRegistry<Event>>,
    pub publisher: Arc<P>,
    pub sinks: SinkConfig,
    pub frame_bytes: usize,
    pub shutdown: watch::Receiver<bool>,
}

impl<P> Clone for SessionContext<P> {
    fn clone(&self) -> Self {
        Self {
            rtp_sinks: Arc::clone(&self.rtp_sinks),
            event_sinks: Arc::clone(&self.event_sinks),
            publisher: Arc::clone(&self.publisher),
            sinks: self.sinks.clone(),
            frame_bytes: self.frame_bytes,
            shutdown: self.shutdown.clone(),
        }
    }
}

/// Handle to a running session supervisor
#[derive(Debug)]
pub struct SessionHandle {
    id: SessionId,
    state: watch::Receiver<SessionState>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }

    /// Wait until the session reaches `target` (or closes first).
    pub async fn wait_for(&mut self, target: SessionState) -> SessionState {
        match self
            .state
            .wait_for(|s| *s == target || *s == SessionState::Closed)
            .await
        {
            Ok(state) => *state,
            Err(_) => SessionState::Closed,
        }
    }

    /// A receiver that follows the session's state.
    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Wait for the supervisor task to finish.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            error!(session_id = %self.id, error = ?e, "Session task panicked");
        }
    }
}

/// Start the supervisor for a freshly negotiated session.
pub fn spawn_session<Tr, C, P>(
    id: SessionId,
    events: mpsc::Receiver<TransportEvent<C>>,
    track: Tr,
    payload_type: u8,
    ctx: SessionContext<P>,
) -> SessionHandle
where
    Tr: MediaTrack + 'static,
    C: DataChannel,
    P: EventPublisher + Sync + 'static,
{
    let (state_tx, state_rx) = watch::channel(SessionState::Negotiating);
    let (closer, close_rx) = CloseSignal::channel();
    let session = PeerSession {
        id: id.clone(),
        state: state_tx,
        payload_type,
        track: Some(track),
        ctx,
        closer,
        reader: None,
    };
    let task = tokio::spawn(session.run(events, close_rx));
    SessionHandle {
        id,
        state: state_rx,
        task,
    }
}

struct PeerSession<Tr, P> {
    id: SessionId,
    state: watch::Sender<SessionState>,
    payload_type: u8,
    track: Option<Tr>,
    ctx: SessionContext<P>,
    closer: CloseSignal,
    reader: Option<JoinHandle<()>>,
}

impl<Tr, P> PeerSession<Tr, P>
where
    Tr: MediaTrack + 'static,
    P: EventPublisher + Sync + 'static,
{
    #[instrument(name = "peer_session", skip_all, fields(session_id = %self.id))]
    async fn run<C: DataChannel>(
        mut self,
        mut events: mpsc::Receiver<TransportEvent<C>>,
        mut close_rx: mpsc::UnboundedReceiver<CloseReason>,
    ) {
        let mut shutdown = self.ctx.shutdown.clone();
        debug!("Session negotiating");

        let reason = loop {
            tokio::select! {
                _ = shutdown.wait_for(|stop| *stop) => break CloseReason::Shutdown,
                Some(reason) = close_rx.recv() => break reason,
                event = events.recv() => match event {
                    Some(TransportEvent::DataChannelOpen(channel)) => self.open(channel),
                    Some(TransportEvent::ConnectionStateChanged(state)) => {
                        info!(state = %state, "Connection state changed");
                        if state.is_terminal() {
                            break CloseReason::Connection(state);
                        }
                    }
                    None => break CloseReason::TransportGone,
                },
            }
        };

        self.close(reason);
    }

    fn open<C: DataChannel>(&mut self, channel: C) {
        if *self.state.borrow() != SessionState::Negotiating {
            warn!(label = channel.label(), "Additional data channel ignored");
            return;
        }
        let Some(track) = self.track.take() else {
            return;
        };
        let label = channel.label().to_string();
        let (writer, reader) = channel.split();
        let sinks = &self.ctx.sinks;

        let rtp = SinkHandle::spawn(
            TrackSink::new(&self.id, track, self.payload_type, self.closer.clone()),
            sinks.rtp_queue_capacity,
            sinks.drop_policy,
        );
        if let Err(e) = self.ctx.rtp_sinks.register(self.id.clone(), rtp) {
            error!(error = %e, "Failed to register RTP sink");
            self.closer.request(CloseReason::RegistrationFailed);
            return;
        }

        let events = SinkHandle::spawn(
            ChannelSink::new(&self.id, writer, self.ctx.frame_bytes, self.closer.clone()),
            sinks.event_queue_capacity,
            sinks.drop_policy,
        );
        if let Err(e) = self.ctx.event_sinks.register(self.id.clone(), events) {
            error!(error = %e, "Failed to register event sink");
            self.closer.request(CloseReason::RegistrationFailed);
            return;
        }

        self.reader = Some(tokio::spawn(read_frames(
            self.id.clone(),
            reader,
            Arc::clone(&self.ctx.publisher),
            self.ctx.frame_bytes,
            self.closer.clone(),
        )));

        self.state.send_replace(SessionState::Open);
        counter!("webrtc_proxy_sessions_opened_total").increment(1);
        gauge!("webrtc_proxy_active_sessions").increment(1.0);
        info!(label = %label, "Data channel open, session streaming");
    }

    fn close(&mut self, reason: CloseReason) {
        let rtp_removed = self.ctx.rtp_sinks.unregister(&self.id);
        let events_removed = self.ctx.event_sinks.unregister(&self.id);
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }

        let previous = self.state.send_replace(SessionState::Closed);
        if previous == SessionState::Open {
            gauge!("webrtc_proxy_active_sessions").decrement(1.0);
        }
        counter!("webrtc_proxy_sessions_closed_total").increment(1);
        info!(
            reason = %reason,
            previous = %previous,
            rtp_removed,
            events_removed,
            "Session closed"
        );
    }
}

/// Inbound data channel loop: each frame is one encoded event for the bus.
#[instrument(name = "data_channel_reader", skip_all, fields(session_id = %id))]
async fn read_frames<R, P>(
    id: SessionId,
    mut reader: R,
    publisher: Arc<P>,
    frame_bytes: usize,
    closer: CloseSignal,
) where
    R: ChannelReader,
    P: EventPublisher + Sync,
{
    loop {
        let frame = match reader.recv().await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!("Data channel closed by peer");
                break;
            }
            Err(e) => {
                info!(error = %e, "Data channel read failed");
                break;
            }
        };

        if frame.len() > frame_bytes {
            warn!(size = frame.len(), max = frame_bytes, "Oversized frame skipped");
            counter!("webrtc_proxy_malformed_frames_total", "reason" => "oversized").increment(1);
            continue;
        }

        match Event::decode(&frame) {
            Ok(event) => {
                debug!(event = event.name(), "Forwarding event to bus");
                publisher.publish(event).await;
            }
            Err(e) => {
                warn!(error = %e, "Malformed frame skipped");
                counter!("webrtc_proxy_malformed_frames_total", "reason" => reason_label(&e))
                    .increment(1);
            }
        }
    }
    closer.request(CloseReason::DataChannelClosed);
}

fn reason_label(e: &ContractError) -> &'static str {
    if e.is_decode() {
        "decode"
    } else {
        "other"
    }
}
