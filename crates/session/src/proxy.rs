//! Proxy - the fan-out hub
//!
//! Owns the two sink registries, the two dispatch loops feeding them and
//! the table of peer sessions created by negotiation requests.

use std::collections::HashMap;
use std::sync::Arc;

use async_channel::Receiver;
use contracts::{
    DropPolicy, Event, EventPublisher, ProxyBlueprint, RtpPacket, SessionId, SinkConfig, StreamKind,
};
use dispatcher::{
    DispatchStats, Dispatcher, DispatcherConfig, LogSink, MetricsSnapshot, SinkHandle,
    SinkRegistry,
};
use metrics::counter;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::codec::resolve_payload_type;
use crate::error::SessionError;
use crate::peer::{spawn_session, SessionContext, SessionHandle, SessionState};
use crate::transport::{NegotiationParams, Negotiator, SessionDescription};

/// Session id under which the debug log sink is registered
pub const LOG_SINK_ID: &str = "log-sink";

/// Proxy settings, usually taken from a [`ProxyBlueprint`]
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub codec: String,
    pub ssrc: u32,
    pub frame_bytes: usize,
    pub sinks: SinkConfig,
}

impl ProxyConfig {
    pub fn from_blueprint(blueprint: &ProxyBlueprint) -> Self {
        Self {
            codec: blueprint.session.codec.clone(),
            ssrc: blueprint.rtp.ssrc,
            frame_bytes: blueprint.session.data_channel_frame_bytes,
            sinks: blueprint.sinks.clone(),
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self::from_blueprint(&ProxyBlueprint::default())
    }
}

/// Result of a successful negotiation
#[derive(Debug, Clone)]
pub struct InitiatedSession {
    pub session_id: SessionId,
    pub answer: SessionDescription,
}

/// Session count plus sink metrics summed per stream kind
#[derive(Debug, Clone, Default)]
pub struct ProxyStats {
    pub sessions: usize,
    pub rtp_sinks: usize,
    pub event_sinks: usize,
    pub rtp: MetricsSnapshot,
    pub events: MetricsSnapshot,
}

struct Sources {
    rtp: Receiver<RtpPacket>,
    events: Receiver<Event>,
}

pub struct Proxy<N, P> {
    negotiator: N,
    config: ProxyConfig,
    ctx: SessionContext<P>,
    sources: Mutex<Option<Sources>>,
    dispatchers: Mutex<Vec<JoinHandle<DispatchStats>>>,
    sessions: Mutex<HashMap<SessionId, SessionHandle>>,
}

impl<N, P> Proxy<N, P>
where
    N: Negotiator,
    P: EventPublisher + Sync + 'static,
{
    /// `rtp` and `events` are the single producers the dispatch loops read.
    pub fn new(
        negotiator: N,
        publisher: Arc<P>,
        config: ProxyConfig,
        rtp: Receiver<RtpPacket>,
        events: Receiver<Event>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let ctx = SessionContext {
            rtp_sinks: Arc::new(SinkRegistry::new(StreamKind::Rtp)),
            event_sinks: Arc::new(SinkRegistry::new(StreamKind::Event)),
            publisher,
            sinks: config.sinks.clone(),
            frame_bytes: config.frame_bytes,
            shutdown,
        };
        Self {
            negotiator,
            config,
            ctx,
            sources: Mutex::new(Some(Sources { rtp, events })),
            dispatchers: Mutex::new(Vec::new()),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn rtp_sinks(&self) -> &Arc<SinkRegistry<RtpPacket>> {
        &self.ctx.rtp_sinks
    }

    pub fn event_sinks(&self) -> &Arc<SinkRegistry<Event>> {
        &self.ctx.event_sinks
    }

    /// Start both dispatch loops. Returns false if they were already running.
    pub fn start(&self) -> bool {
        let Some(sources) = self.sources.lock().take() else {
            return false;
        };
        let config = DispatcherConfig {
            max_consecutive_drops: self.config.sinks.max_consecutive_drops,
        };
        let rtp = Dispatcher::new(Arc::clone(&self.ctx.rtp_sinks), sources.rtp, config.clone())
            .spawn(self.ctx.shutdown.clone());
        let events = Dispatcher::new(Arc::clone(&self.ctx.event_sinks), sources.events, config)
            .spawn(self.ctx.shutdown.clone());
        self.dispatchers.lock().extend([rtp, events]);
        info!("Fan-out started");
        true
    }

    pub fn is_started(&self) -> bool {
        self.sources.lock().is_none()
    }

    /// Negotiate a new browser session from its offer.
    ///
    /// A capability mismatch is returned before any session state exists.
    #[instrument(name = "initiate_peer_connection", skip_all, fields(codec = %self.config.codec))]
    pub async fn initiate_peer_connection(
        &self,
        offer: SessionDescription,
    ) -> Result<InitiatedSession, SessionError> {
        let payload_type = match resolve_payload_type(&offer, &self.config.codec) {
            Ok(pt) => pt,
            Err(e) => {
                warn!(error = %e, "Offer rejected");
                counter!("webrtc_proxy_offers_rejected_total").increment(1);
                return Err(e);
            }
        };

        let transport = self
            .negotiator
            .negotiate(NegotiationParams {
                offer,
                codec: self.config.codec.clone(),
                payload_type,
                ssrc: self.config.ssrc,
            })
            .await?;

        let session_id = SessionId::generate();
        let handle = spawn_session(
            session_id.clone(),
            transport.events,
            transport.media_track,
            payload_type,
            self.ctx.clone(),
        );
        self.sessions.lock().insert(session_id.clone(), handle);
        info!(session_id = %session_id, payload_type, "Peer session created");

        Ok(InitiatedSession {
            session_id,
            answer: transport.answer,
        })
    }

    /// Sessions that have not closed yet. Closed ones are pruned.
    pub fn session_count(&self) -> usize {
        let mut sessions = self.sessions.lock();
        sessions.retain(|_, handle| !handle.is_closed());
        sessions.len()
    }

    pub fn session_state(&self, id: &str) -> Option<SessionState> {
        self.sessions.lock().get(id).map(SessionHandle::state)
    }

    /// Follow one session's state transitions.
    pub fn watch_session(&self, id: &str) -> Option<watch::Receiver<SessionState>> {
        self.sessions.lock().get(id).map(SessionHandle::watch)
    }

    /// Register a [`LogSink`] on both streams, for debugging without peers.
    pub fn attach_log_sink(&self) -> Result<(), SessionError> {
        let id = SessionId::new(LOG_SINK_ID);
        self.ctx.rtp_sinks.register(
            id.clone(),
            SinkHandle::spawn(
                LogSink::new(format!("{LOG_SINK_ID}/rtp")),
                self.config.sinks.rtp_queue_capacity,
                DropPolicy::DropNewest,
            ),
        )?;
        if let Err(e) = self.ctx.event_sinks.register(
            id,
            SinkHandle::spawn(
                LogSink::new(format!("{LOG_SINK_ID}/events")),
                self.config.sinks.event_queue_capacity,
                DropPolicy::DropNewest,
            ),
        ) {
            self.ctx.rtp_sinks.unregister(LOG_SINK_ID);
            return Err(e.into());
        }
        Ok(())
    }

    pub fn stats(&self) -> ProxyStats {
        let mut stats = ProxyStats {
            sessions: self.session_count(),
            rtp_sinks: self.ctx.rtp_sinks.len(),
            event_sinks: self.ctx.event_sinks.len(),
            ..Default::default()
        };
        for handle in self.ctx.rtp_sinks.snapshot().values() {
            stats.rtp += handle.metrics().snapshot();
        }
        for handle in self.ctx.event_sinks.snapshot().values() {
            stats.events += handle.metrics().snapshot();
        }
        stats
    }

    /// Wait for dispatchers and sessions to stop, then drain remaining sinks.
    ///
    /// Call after the shutdown signal has been sent.
    #[instrument(name = "proxy_shutdown", skip(self))]
    pub async fn shutdown(&self) -> Vec<DispatchStats> {
        let dispatchers: Vec<_> = self.dispatchers.lock().drain(..).collect();
        let mut results = Vec::with_capacity(dispatchers.len());
        for task in dispatchers {
            match task.await {
                Ok(stats) => results.push(stats),
                Err(e) => error!(error = ?e, "Dispatcher task panicked"),
            }
        }

        let sessions: Vec<_> = self.sessions.lock().drain().map(|(_, h)| h).collect();
        for session in sessions {
            session.join().await;
        }

        self.ctx.rtp_sinks.shutdown_all().await;
        self.ctx.event_sinks.shutdown_all().await;
        info!("Proxy stopped");
        results
    }
}
