//! Dispatcher - main loop for fan-out to sinks

use std::sync::Arc;

use async_channel::Receiver;
use ingestion::Offer;
use metrics::counter;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::metrics::MetricsSnapshot;
use crate::registry::SinkRegistry;

/// Dispatcher configuration
#[derive(Debug, Clone, Default)]
pub struct DispatcherConfig {
    /// Consecutive drops after which a sink is unregistered; 0 disables
    pub max_consecutive_drops: u32,
}

/// Counters for one dispatch loop
#[derive(Debug, Clone, Copy, Default)]
pub struct DispatchStats {
    /// Items read from the producer
    pub items: u64,
    /// Copies queued to sinks
    pub delivered: u64,
    /// Copies lost to full queues
    pub dropped: u64,
    /// Sinks removed by the dispatcher (closed or too slow)
    pub evicted: u64,
}

/// Fan-out loop for one stream kind
///
/// Reads each item once and offers a copy to every sink in the registry
/// snapshot taken for that item.
pub struct Dispatcher<T> {
    registry: Arc<SinkRegistry<T>>,
    input_rx: Receiver<T>,
    config: DispatcherConfig,
}

impl<T: Clone + Send + Sync + 'static> Dispatcher<T> {
    pub fn new(
        registry: Arc<SinkRegistry<T>>,
        input_rx: Receiver<T>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            registry,
            input_rx,
            config,
        }
    }

    /// Get metrics for all registered sinks
    pub fn metrics(&self) -> Vec<(String, MetricsSnapshot)> {
        self.registry
            .snapshot()
            .values()
            .map(|h| (h.name().to_string(), h.metrics().snapshot()))
            .collect()
    }

    /// Run the dispatcher main loop
    ///
    /// Returns when the input channel is closed and drained, or on shutdown.
    #[instrument(name = "dispatcher_run", skip_all, fields(kind = %self.registry.kind()))]
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> DispatchStats {
        info!(sinks = self.registry.len(), "Dispatcher started");

        let mut stats = DispatchStats::default();
        loop {
            let item = tokio::select! {
                _ = shutdown.wait_for(|stop| *stop) => break,
                item = self.input_rx.recv() => match item {
                    Ok(item) => item,
                    Err(_) => {
                        info!("Dispatcher input closed");
                        break;
                    }
                },
            };

            stats.items += 1;
            self.dispatch(item, &mut stats);

            if stats.items.is_multiple_of(1000) {
                debug!(items = stats.items, dropped = stats.dropped, "Dispatcher progress");
            }
        }

        info!(
            items = stats.items,
            delivered = stats.delivered,
            dropped = stats.dropped,
            "Dispatcher stopped"
        );
        stats
    }

    /// Spawn the dispatcher as a background task
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<DispatchStats> {
        tokio::spawn(self.run(shutdown))
    }

    fn dispatch(&self, item: T, stats: &mut DispatchStats) {
        let kind = self.registry.kind().as_str();
        let sinks = self.registry.snapshot();
        for (session_id, handle) in sinks.iter() {
            match handle.offer(item.clone()) {
                Offer::Queued => {
                    stats.delivered += 1;
                    counter!("webrtc_proxy_items_dispatched_total", "kind" => kind).increment(1);
                }
                Offer::DroppedOldest | Offer::DroppedNewest => {
                    stats.dropped += 1;
                    counter!("webrtc_proxy_items_dropped_total", "kind" => kind).increment(1);

                    let limit = u64::from(self.config.max_consecutive_drops);
                    if limit > 0 && handle.metrics().consecutive_drops() >= limit {
                        warn!(
                            session_id = %session_id,
                            kind,
                            drops = limit,
                            "Sink cannot keep up, disconnecting"
                        );
                        if self.registry.unregister(session_id) {
                            stats.evicted += 1;
                        }
                    }
                }
                Offer::Closed => {
                    debug!(session_id = %session_id, kind, "Sink closed, removing");
                    if self.registry.unregister(session_id) {
                        stats.evicted += 1;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::SinkHandle;
    use contracts::{ContractError, DataSink, DropPolicy, SessionId, StreamKind};
    use parking_lot::Mutex;
    use std::time::Duration;
    use tokio::sync::Notify;
    use tokio::time::{sleep, timeout};

    /// Records every item; optionally never completes a write
    struct RecordingSink {
        name: String,
        seen: Arc<Mutex<Vec<u32>>>,
        stall: Option<Arc<Notify>>,
    }

    impl DataSink<u32> for RecordingSink {
        fn name(&self) -> &str {
            &self.name
        }

        async fn write(&mut self, item: u32) -> Result<(), ContractError> {
            if let Some(stall) = &self.stall {
                stall.notified().await;
            }
            self.seen.lock().push(item);
            Ok(())
        }

        async fn flush(&mut self) -> Result<(), ContractError> {
            Ok(())
        }

        async fn close(&mut self) -> Result<(), ContractError> {
            Ok(())
        }
    }

    fn register(
        registry: &SinkRegistry<u32>,
        id: &str,
        capacity: usize,
        stall: Option<Arc<Notify>>,
    ) -> Arc<Mutex<Vec<u32>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = RecordingSink {
            name: id.to_string(),
            seen: Arc::clone(&seen),
            stall,
        };
        registry
            .register(
                SessionId::new(id),
                SinkHandle::spawn(sink, capacity, DropPolicy::DropNewest),
            )
            .unwrap();
        seen
    }

    async fn wait_for_len(seen: &Arc<Mutex<Vec<u32>>>, len: usize) {
        timeout(Duration::from_secs(5), async {
            while seen.lock().len() < len {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("sink did not receive items in time");
    }

    #[tokio::test]
    async fn test_dispatcher_fanout_every_sink_every_item() {
        let registry = Arc::new(SinkRegistry::new(StreamKind::Event));
        let sinks: Vec<_> = ["s1", "s2", "s3"]
            .iter()
            .map(|id| register(&registry, id, 16, None))
            .collect();

        let (input_tx, input_rx) = async_channel::bounded(16);
        let (_stop_tx, stop_rx) = watch::channel(false);
        let task = Dispatcher::new(Arc::clone(&registry), input_rx, DispatcherConfig::default())
            .spawn(stop_rx);

        for i in 0..5 {
            input_tx.send(i).await.unwrap();
        }
        drop(input_tx);

        let stats = task.await.unwrap();
        assert_eq!(stats.items, 5);
        assert_eq!(stats.delivered, 15);

        for seen in &sinks {
            wait_for_len(seen, 5).await;
            assert_eq!(*seen.lock(), vec![0, 1, 2, 3, 4]);
        }
        registry.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_stalled_sink_does_not_delay_others() {
        let registry = Arc::new(SinkRegistry::new(StreamKind::Rtp));
        let stall = Arc::new(Notify::new());
        let stuck = register(&registry, "stuck", 2, Some(stall));
        let healthy = register(&registry, "healthy", 256, None);

        let (input_tx, input_rx) = async_channel::bounded(256);
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = Dispatcher::new(Arc::clone(&registry), input_rx, DispatcherConfig::default())
            .spawn(stop_rx);

        for i in 0..100 {
            input_tx.send(i).await.unwrap();
        }

        wait_for_len(&healthy, 100).await;
        assert!(stuck.lock().is_empty());
        assert!(registry.get("stuck").unwrap().metrics().dropped_count() > 0);

        stop_tx.send(true).unwrap();
        let stats = task.await.unwrap();
        assert!(stats.dropped > 0);
    }

    #[tokio::test]
    async fn test_slow_sink_disconnected_after_consecutive_drops() {
        let registry = Arc::new(SinkRegistry::new(StreamKind::Event));
        let stall = Arc::new(Notify::new());
        register(&registry, "stuck", 1, Some(stall));
        let healthy = register(&registry, "healthy", 64, None);

        let (input_tx, input_rx) = async_channel::bounded(64);
        let (stop_tx, stop_rx) = watch::channel(false);
        let config = DispatcherConfig {
            max_consecutive_drops: 3,
        };
        let task = Dispatcher::new(Arc::clone(&registry), input_rx, config).spawn(stop_rx);

        for i in 0..10 {
            input_tx.send(i).await.unwrap();
        }
        wait_for_len(&healthy, 10).await;

        assert!(!registry.contains("stuck"));
        assert!(registry.contains("healthy"));

        stop_tx.send(true).unwrap();
        assert_eq!(task.await.unwrap().evicted, 1);
    }
}
