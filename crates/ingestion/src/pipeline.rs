//! Ingestion Pipeline main entry

use std::sync::Arc;

use async_channel::{bounded, Receiver, Sender};
use contracts::{Event, RtpPacket};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

use crate::backpressure::{offer, Offer};
use crate::config::{BackpressureConfig, IngestionMetrics};
use crate::rtp::RtpSource;

/// Ingestion Pipeline
///
/// Owns the two producer queues feeding the fan-out dispatcher: one for
/// RTP packets, one for bus events.
pub struct IngestionPipeline {
    /// RTP producer side (plus an eviction handle for drop-oldest)
    rtp_tx: Sender<RtpPacket>,
    rtp_evict: Receiver<RtpPacket>,
    rtp_rx: Option<Receiver<RtpPacket>>,

    /// Event producer side
    event_tx: Sender<Event>,
    event_evict: Receiver<Event>,
    event_rx: Option<Receiver<Event>>,

    /// Shared metrics (RTP stream)
    metrics: Arc<IngestionMetrics>,

    config: BackpressureConfig,
}

impl IngestionPipeline {
    /// Create new Ingestion Pipeline
    pub fn new(config: BackpressureConfig) -> Self {
        let (rtp_tx, rtp_rx) = bounded(config.rtp_capacity);
        let (event_tx, event_rx) = bounded(config.event_capacity);

        Self {
            rtp_tx,
            rtp_evict: rtp_rx.clone(),
            rtp_rx: Some(rtp_rx),
            event_tx,
            event_evict: event_rx.clone(),
            event_rx: Some(event_rx),
            metrics: Arc::new(IngestionMetrics::new()),
            config,
        }
    }

    /// Start reading `source` into the RTP queue
    #[instrument(name = "ingestion_spawn_rtp", skip_all)]
    pub fn spawn_rtp(&self, source: RtpSource, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        debug!(ssrc = source.ssrc(), "starting rtp source");
        tokio::spawn(source.run(
            self.rtp_tx.clone(),
            self.rtp_evict.clone(),
            self.config.drop_policy,
            Arc::clone(&self.metrics),
            shutdown,
        ))
    }

    /// Sender for the event stream
    ///
    /// Hand this to the EventBus as its delivery queue. The bus never
    /// blocks on it: when full, the bus drops the incoming event.
    pub fn event_sender(&self) -> Sender<Event> {
        self.event_tx.clone()
    }

    /// Push one locally produced event, honoring the drop policy
    pub fn push_event(&self, event: Event) -> Offer {
        offer(
            &self.event_tx,
            &self.event_evict,
            event,
            self.config.drop_policy,
        )
    }

    /// Get RTP stream receiver
    ///
    /// Note: Can only be called once, subsequent calls return None
    pub fn take_rtp_receiver(&mut self) -> Option<Receiver<RtpPacket>> {
        self.rtp_rx.take()
    }

    /// Get event stream receiver
    ///
    /// Note: Can only be called once, subsequent calls return None
    pub fn take_event_receiver(&mut self) -> Option<Receiver<Event>> {
        self.event_rx.take()
    }

    /// Get metrics reference
    pub fn metrics(&self) -> Arc<IngestionMetrics> {
        self.metrics.clone()
    }

    /// Close both queues; consumers drain what is left and stop
    pub fn close(&self) {
        info!(
            rtp_queued = self.rtp_tx.len(),
            events_queued = self.event_tx.len(),
            "closing ingestion queues"
        );
        self.rtp_tx.close();
        self.event_tx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{DropPolicy, Payload};

    #[test]
    fn test_take_receiver_once() {
        let mut pipeline = IngestionPipeline::new(BackpressureConfig::default());
        assert!(pipeline.take_rtp_receiver().is_some());
        assert!(pipeline.take_rtp_receiver().is_none());
        assert!(pipeline.take_event_receiver().is_some());
        assert!(pipeline.take_event_receiver().is_none());
    }

    #[tokio::test]
    async fn test_push_event_drop_oldest() {
        let mut pipeline = IngestionPipeline::new(BackpressureConfig::new(4, 2, DropPolicy::DropOldest));
        let rx = pipeline.take_event_receiver().unwrap();

        for name in ["a", "b", "c"] {
            pipeline.push_event(Event::new(name, Payload::default()));
        }
        assert_eq!(rx.recv().await.unwrap().name(), "b");
        assert_eq!(rx.recv().await.unwrap().name(), "c");
    }

    #[tokio::test]
    async fn test_close_ends_consumers_after_drain() {
        let mut pipeline = IngestionPipeline::new(BackpressureConfig::default());
        let rx = pipeline.take_event_receiver().unwrap();
        pipeline
            .event_sender()
            .send(Event::new("last", Payload::default()))
            .await
            .unwrap();
        pipeline.close();
        assert_eq!(rx.recv().await.unwrap().name(), "last");
        assert!(rx.recv().await.is_err());
    }
}
