//! Run statistics.

use std::time::Duration;

use dispatcher::DispatchStats;
use observability::ThroughputSummary;

/// Statistics from one proxy run
#[derive(Debug, Clone, Default)]
pub struct RunStats {
    /// Total duration of the run
    pub duration: Duration,

    /// RTP ingest counters
    pub ingest: ingestion::MetricsSnapshot,

    /// Dispatch loop counters, RTP first then events
    pub dispatch: Vec<DispatchStats>,

    /// Bus peers known at shutdown
    pub bus_peers: usize,

    /// Distinct event names seen on the bus
    pub bus_events: usize,

    /// Per-stream write rates
    pub throughput: ThroughputSummary,
}

impl RunStats {
    /// RTP packets received per second
    pub fn packet_rate(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.ingest.packets_received as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        println!("\n=== Proxy Statistics ===\n");

        println!("Overview");
        println!("  Duration: {:.2}s", self.duration.as_secs_f64());
        println!("  Bus peers at exit: {}", self.bus_peers);
        println!("  Event names seen: {}", self.bus_events);

        println!("\nRTP ingest");
        println!("  Received: {}", self.ingest.packets_received);
        println!("  Malformed: {}", self.ingest.parse_errors);
        println!("  Dropped: {}", self.ingest.packets_dropped);
        println!("  Rate: {:.2} pkt/s", self.packet_rate());

        for (kind, stats) in ["rtp", "event"].iter().zip(&self.dispatch) {
            println!("\nDispatch ({kind})");
            println!("  Items: {}", stats.items);
            println!("  Delivered: {}", stats.delivered);
            println!("  Dropped: {}", stats.dropped);
            println!("  Sinks evicted: {}", stats.evicted);
        }

        println!("\n{}", self.throughput);
    }
}
