//! SinkHandle - manages a sink with isolated queue and worker task

use std::sync::Arc;

use async_channel::{bounded, Receiver, Sender};
use contracts::{ContractError, DataSink, DropPolicy};
use ingestion::{offer, Offer};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, trace};

use crate::metrics::SinkMetrics;

/// Handle to a running sink worker
pub struct SinkHandle<T> {
    /// Sink name
    name: String,
    /// Channel to send items to worker
    tx: Sender<T>,
    /// Second receiver on the same channel, used to evict under drop-oldest
    evict: Receiver<T>,
    drop_policy: DropPolicy,
    /// Shared metrics
    metrics: Arc<SinkMetrics>,
    /// Worker task handle
    worker_handle: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + 'static> SinkHandle<T> {
    /// Create a new SinkHandle and spawn the worker task
    pub fn spawn<S>(sink: S, queue_capacity: usize, drop_policy: DropPolicy) -> Self
    where
        S: DataSink<T> + 'static,
    {
        let name = sink.name().to_string();
        let (tx, rx) = bounded(queue_capacity);
        let metrics = Arc::new(SinkMetrics::new());

        let evict = rx.clone();
        let worker_metrics = Arc::clone(&metrics);
        let worker_name = name.clone();
        let worker_handle = tokio::spawn(async move {
            sink_worker(sink, rx, worker_metrics, worker_name).await;
        });

        Self {
            name,
            tx,
            evict,
            drop_policy,
            metrics,
            worker_handle: Mutex::new(Some(worker_handle)),
        }
    }
}

impl<T> SinkHandle<T> {
    /// Get sink name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get current metrics
    pub fn metrics(&self) -> &Arc<SinkMetrics> {
        &self.metrics
    }

    /// Offer an item to the sink (non-blocking)
    ///
    /// A full queue applies the drop policy; the caller never waits.
    pub fn offer(&self, item: T) -> Offer {
        let outcome = offer(&self.tx, &self.evict, item, self.drop_policy);
        match outcome {
            Offer::Queued => self.metrics.record_enqueued(),
            Offer::DroppedOldest | Offer::DroppedNewest => {
                let consecutive = self.metrics.record_drop();
                trace!(sink = %self.name, consecutive, policy = ?self.drop_policy, "Queue full, item dropped");
            }
            Offer::Closed => trace!(sink = %self.name, "Sink closed, item discarded"),
        }
        self.metrics.set_queue_len(self.tx.len());
        outcome
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Stop accepting items. The worker drains what is queued, then closes the sink.
    pub fn close(&self) {
        self.tx.close();
    }

    /// Close and wait for the worker to finish
    #[instrument(name = "sink_handle_shutdown", skip(self), fields(sink = %self.name))]
    pub async fn shutdown(&self) {
        self.close();
        let worker = self.worker_handle.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!(sink = %self.name, error = ?e, "Worker task panicked");
            }
        }
        debug!(sink = %self.name, "SinkHandle shutdown complete");
    }
}

impl<T> std::fmt::Debug for SinkHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkHandle")
            .field("name", &self.name)
            .field("drop_policy", &self.drop_policy)
            .field("metrics", &self.metrics.snapshot())
            .finish()
    }
}

/// Worker task that consumes items and writes to sink
#[instrument(
    name = "sink_worker_loop",
    skip(sink, rx, metrics),
    fields(sink = %name)
)]
async fn sink_worker<T, S: DataSink<T>>(
    mut sink: S,
    rx: Receiver<T>,
    metrics: Arc<SinkMetrics>,
    name: String,
) {
    debug!(sink = %name, "Sink worker started");

    while let Ok(item) = rx.recv().await {
        // Update queue length
        metrics.set_queue_len(rx.len());

        match sink.write(item).await {
            Ok(()) => {
                metrics.inc_write_count();
            }
            Err(ContractError::SinkClosed { .. }) => {
                debug!(sink = %name, "Sink endpoint gone, worker stopping");
                rx.close();
                break;
            }
            Err(e) => {
                metrics.inc_failure_count();
                error!(sink = %name, error = %e, "Write failed");
                // Continue processing - don't crash on single failure
            }
        }
    }

    // Cleanup
    if let Err(e) = sink.flush().await {
        error!(sink = %name, error = %e, "Flush failed on shutdown");
    }
    if let Err(e) = sink.close().await {
        error!(sink = %name, error = %e, "Close failed on shutdown");
    }

    debug!(sink = %name, "Sink worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio::sync::Notify;
    use tokio::time::{sleep, Duration};

    /// Mock sink for testing
    struct MockSink {
        name: String,
        written: Arc<Mutex<Vec<u64>>>,
        should_fail: bool,
        gate: Option<Arc<Notify>>,
        closed: Arc<AtomicU64>,
    }

    impl MockSink {
        fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                written: Arc::new(Mutex::new(Vec::new())),
                should_fail: false,
                gate: None,
                closed: Arc::new(AtomicU64::new(0)),
            }
        }
    }

    impl DataSink<u64> for MockSink {
        fn name(&self) -> &str {
            &self.name
        }

        async fn write(&mut self, item: u64) -> Result<(), ContractError> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.should_fail {
                return Err(ContractError::sink_write(&self.name, "mock failure"));
            }
            if item == u64::MAX {
                return Err(ContractError::SinkClosed {
                    sink_name: self.name.clone(),
                });
            }
            self.written.lock().push(item);
            Ok(())
        }

        async fn flush(&mut self) -> Result<(), ContractError> {
            Ok(())
        }

        async fn close(&mut self) -> Result<(), ContractError> {
            self.closed.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_sink_handle_fifo_and_drain_on_shutdown() {
        let sink = MockSink::new("test");
        let written = Arc::clone(&sink.written);
        let closed = Arc::clone(&sink.closed);

        let handle = SinkHandle::spawn(sink, 10, DropPolicy::DropOldest);
        for i in 0..5 {
            assert_eq!(handle.offer(i), Offer::Queued);
        }

        handle.shutdown().await;
        assert_eq!(*written.lock(), vec![0, 1, 2, 3, 4]);
        assert_eq!(handle.metrics().write_count(), 5);
        assert_eq!(closed.load(Ordering::Relaxed), 1);
        assert_eq!(handle.offer(9), Offer::Closed);
    }

    #[tokio::test]
    async fn test_sink_handle_queue_full_drop_oldest() {
        let gate = Arc::new(Notify::new());
        let mut sink = MockSink::new("slow");
        sink.gate = Some(Arc::clone(&gate));
        let written = Arc::clone(&sink.written);

        let handle = SinkHandle::spawn(sink, 2, DropPolicy::DropOldest);
        // Worker takes the first item and blocks on the gate
        handle.offer(0);
        sleep(Duration::from_millis(20)).await;

        for i in 1..6 {
            handle.offer(i);
        }
        assert_eq!(handle.metrics().dropped_count(), 3);
        assert_eq!(handle.metrics().consecutive_drops(), 3);

        for _ in 0..3 {
            gate.notify_one();
            sleep(Duration::from_millis(10)).await;
        }
        handle.close();
        gate.notify_one();
        handle.shutdown().await;

        // The two newest survived behind the in-flight item
        assert_eq!(*written.lock(), vec![0, 4, 5]);
    }

    #[tokio::test]
    async fn test_sink_handle_failure_isolation() {
        let mut sink = MockSink::new("failing");
        sink.should_fail = true;

        let handle = SinkHandle::spawn(sink, 10, DropPolicy::DropNewest);
        for i in 0..3 {
            handle.offer(i);
        }

        // Give worker time to process
        sleep(Duration::from_millis(50)).await;

        // Should have recorded failures but kept running
        assert_eq!(handle.metrics().failure_count(), 3);
        assert!(!handle.is_closed());

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_sink_closed_error_stops_worker() {
        let sink = MockSink::new("gone");
        let closed = Arc::clone(&sink.closed);
        let handle = SinkHandle::spawn(sink, 10, DropPolicy::DropOldest);

        handle.offer(u64::MAX);
        sleep(Duration::from_millis(50)).await;

        assert!(handle.is_closed());
        assert_eq!(handle.offer(1), Offer::Closed);
        assert_eq!(closed.load(Ordering::Relaxed), 1);
        handle.shutdown().await;
    }
}
