//! Proxy runtime - wires bus, ingest, fan-out and sessions together.
//!
//! Browser sessions enter through the negotiation seam; this binary links
//! the in-process loopback transport, so only local peers can attach.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use contracts::{ProxyBlueprint, StreamKind};
use dispatcher::MetricsSnapshot;
use eventbus::EventBus;
use ingestion::{BackpressureConfig, IngestionMetrics, IngestionPipeline, RtpSource};
use observability::{StreamTotals, ThroughputAggregator};
use session::{LoopbackNegotiator, Proxy, ProxyConfig, ProxyService, StartStreamRequest};
use tokio::sync::watch;
use tracing::{info, warn};

use super::RunStats;

type RuntimeProxy = Proxy<LoopbackNegotiator, EventBus>;

/// Runtime configuration
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Validated proxy blueprint
    pub blueprint: ProxyBlueprint,

    /// Attach a log sink to both streams
    pub log_sink: bool,

    /// Metrics server port (None = disabled)
    pub metrics_port: Option<u16>,

    /// Statistics sampling period
    pub stats_interval: Duration,

    /// Stop after this long (None = until signalled)
    pub timeout: Option<Duration>,
}

/// Main runtime orchestrator
pub struct ProxyRuntime {
    config: RuntimeConfig,
}

impl ProxyRuntime {
    pub fn new(config: RuntimeConfig) -> Self {
        Self { config }
    }

    /// Run until `shutdown` resolves (or the timeout elapses), then stop
    /// every loop and drain the sinks.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<RunStats> {
        let start_time = Instant::now();
        let blueprint = &self.config.blueprint;

        if let Some(port) = self.config.metrics_port {
            observability::init_metrics_only(port)?;
            info!("Metrics endpoint available on port {}", port);
        }

        let (stop_tx, stop_rx) = watch::channel(false);

        // Ingestion
        let mut ingestion = IngestionPipeline::new(BackpressureConfig::from_blueprint(blueprint));
        let rtp_source = RtpSource::bind(&blueprint.rtp)
            .with_context(|| format!("Failed to bind RTP listener on {}", blueprint.rtp.listen))?;
        info!(listen = %blueprint.rtp.listen, "RTP ingest bound");
        let rtp_task = ingestion.spawn_rtp(rtp_source, stop_rx.clone());

        // Event bus, delivering into the event stream
        let bus = Arc::new(
            EventBus::bind(blueprint.bus.clone(), Some(ingestion.event_sender()))
                .with_context(|| {
                    format!("Failed to join bus group {}", blueprint.bus.multicast_group)
                })?,
        );
        let bus_task = tokio::spawn(Arc::clone(&bus).run(stop_rx.clone()));

        // Fan-out hub
        let rtp_rx = ingestion
            .take_rtp_receiver()
            .context("RTP receiver already taken")?;
        let event_rx = ingestion
            .take_event_receiver()
            .context("Event receiver already taken")?;
        let negotiator = detached_negotiator();
        let proxy = Arc::new(Proxy::new(
            negotiator,
            Arc::clone(&bus),
            ProxyConfig::from_blueprint(blueprint),
            rtp_rx,
            event_rx,
            stop_rx.clone(),
        ));

        if self.config.log_sink {
            proxy.attach_log_sink().context("Failed to attach log sink")?;
            info!("Log sink attached");
        }

        let started = ProxyService::start_stream(&*proxy, StartStreamRequest::default())
            .await
            .context("Failed to start fan-out")?;
        info!(started = started.started, "Proxy running");

        let stats_task = tokio::spawn(sample_stats(
            Arc::clone(&proxy),
            Arc::clone(&bus),
            ingestion.metrics(),
            self.config.stats_interval,
            stop_rx,
        ));

        // Wait for a stop condition
        match self.config.timeout {
            Some(timeout) => tokio::select! {
                _ = shutdown => info!("Received shutdown signal"),
                _ = tokio::time::sleep(timeout) => {
                    warn!(timeout_secs = timeout.as_secs(), "Run timeout reached");
                }
            },
            None => {
                shutdown.await;
                info!("Received shutdown signal");
            }
        }

        // Shutdown
        info!("Stopping proxy...");
        let _ = stop_tx.send(true);
        if let Err(e) = rtp_task.await {
            warn!(error = %e, "RTP ingest task failed");
        }
        if let Err(e) = bus_task.await {
            warn!(error = %e, "Event bus task failed");
        }
        ingestion.close();

        let dispatch = tokio::time::timeout(Duration::from_secs(5), proxy.shutdown())
            .await
            .unwrap_or_else(|_| {
                warn!("Sinks did not drain within 5s");
                Vec::new()
            });
        let throughput = match stats_task.await {
            Ok(aggregator) => aggregator.summary(),
            Err(e) => {
                warn!(error = %e, "Statistics task failed");
                Default::default()
            }
        };

        let stats = RunStats {
            duration: start_time.elapsed(),
            ingest: ingestion.metrics().snapshot(),
            dispatch,
            bus_peers: bus.peer_count(),
            bus_events: bus.state().len(),
            throughput,
        };

        info!(
            duration_secs = stats.duration.as_secs_f64(),
            "Proxy shutdown complete"
        );
        Ok(stats)
    }
}

/// Loopback negotiator with no remote side attached.
///
/// No browser transport is linked into this binary, so every
/// InitiatePeerConnection fails with a negotiation error instead of
/// leaving a half-open session behind.
fn detached_negotiator() -> LoopbackNegotiator {
    let (negotiator, peers) = LoopbackNegotiator::new();
    drop(peers);
    warn!("No browser transport linked: peer connection requests will be refused");
    negotiator
}

/// Periodically export gauges and feed the throughput aggregator
async fn sample_stats(
    proxy: Arc<RuntimeProxy>,
    bus: Arc<EventBus>,
    ingest: Arc<IngestionMetrics>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> ThroughputAggregator {
    let mut aggregator = ThroughputAggregator::new();
    let mut interval = tokio::time::interval(period);
    interval.tick().await;
    let mut last = Instant::now();

    loop {
        tokio::select! {
            _ = shutdown.wait_for(|stop| *stop) => break,
            _ = interval.tick() => {}
        }
        let elapsed = last.elapsed();
        last = Instant::now();

        let stats = proxy.stats();
        let rtp = totals(&stats.rtp);
        let events = totals(&stats.events);
        observability::record_sessions(stats.sessions);
        observability::record_sink_totals(StreamKind::Rtp, stats.rtp_sinks, &rtp);
        observability::record_sink_totals(StreamKind::Event, stats.event_sinks, &events);
        observability::record_bus_peers(bus.peer_count());

        let ingest = ingest.snapshot();
        observability::record_ingest_totals(
            ingest.packets_received,
            ingest.parse_errors,
            ingest.packets_dropped,
        );

        aggregator.sample(StreamKind::Rtp, rtp, elapsed);
        aggregator.sample(StreamKind::Event, events, elapsed);

        info!(
            sessions = stats.sessions,
            peers = bus.peer_count(),
            rtp_received = ingest.packets_received,
            rtp_written = rtp.written,
            events_written = events.written,
            dropped = rtp.dropped + events.dropped,
            "Proxy stats"
        );
    }
    aggregator
}

fn totals(snapshot: &MetricsSnapshot) -> StreamTotals {
    StreamTotals {
        written: snapshot.write_count,
        dropped: snapshot.dropped_count,
        failed: snapshot.failure_count,
        queued: snapshot.queue_len as u64,
    }
}
