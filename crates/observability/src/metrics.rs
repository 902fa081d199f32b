//! 代理运行指标
//!
//! 周期性地把会话数、sink 计数、总线对端数与 RTP 接收计数导出为 gauge，
//! 并在内存中聚合每个流的吞吐统计，便于退出时输出摘要。

use std::collections::BTreeMap;
use std::time::Duration;

use contracts::StreamKind;
use metrics::gauge;

/// 记录当前活跃会话数
pub fn record_sessions(active: usize) {
    gauge!("webrtc_proxy_sessions").set(active as f64);
}

/// 记录某一流类型所有 sink 的累计计数
pub fn record_sink_totals(kind: StreamKind, sinks: usize, totals: &StreamTotals) {
    let kind = kind.as_str();
    gauge!("webrtc_proxy_sinks", "kind" => kind).set(sinks as f64);
    gauge!("webrtc_proxy_sink_written", "kind" => kind).set(totals.written as f64);
    gauge!("webrtc_proxy_sink_dropped", "kind" => kind).set(totals.dropped as f64);
    gauge!("webrtc_proxy_sink_failed", "kind" => kind).set(totals.failed as f64);
    gauge!("webrtc_proxy_sink_queue_len", "kind" => kind).set(totals.queued as f64);
}

/// 记录总线已知对端数量
pub fn record_bus_peers(peers: usize) {
    gauge!("webrtc_proxy_bus_peers").set(peers as f64);
}

/// 记录 RTP 接收累计计数
pub fn record_ingest_totals(received: u64, malformed: u64, dropped: u64) {
    gauge!("webrtc_proxy_rtp_received").set(received as f64);
    gauge!("webrtc_proxy_rtp_malformed").set(malformed as f64);
    gauge!("webrtc_proxy_rtp_ingest_dropped").set(dropped as f64);
}

/// 一个流类型的 sink 累计计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamTotals {
    pub written: u64,
    pub dropped: u64,
    pub failed: u64,
    pub queued: u64,
}

/// 吞吐聚合器
///
/// 每次采样传入累计计数，按与上次采样的差值计算每秒写入速率。
#[derive(Debug, Clone, Default)]
pub struct ThroughputAggregator {
    streams: BTreeMap<&'static str, StreamState>,
}

#[derive(Debug, Clone, Default)]
struct StreamState {
    last: StreamTotals,
    rate: RunningStats,
}

impl ThroughputAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一次采样。`elapsed` 为距上次采样的时间。
    pub fn sample(&mut self, kind: StreamKind, totals: StreamTotals, elapsed: Duration) {
        let state = self.streams.entry(kind.as_str()).or_default();
        let secs = elapsed.as_secs_f64();
        // 计数可能因 sink 注销而回退
        let written = totals.written.saturating_sub(state.last.written);
        if secs > 0.0 {
            state.rate.push(written as f64 / secs);
        }
        state.last = totals;
    }

    /// 生成摘要报告
    pub fn summary(&self) -> ThroughputSummary {
        ThroughputSummary {
            streams: self
                .streams
                .iter()
                .map(|(kind, state)| (*kind, (state.last, StatsSummary::from(&state.rate))))
                .collect(),
        }
    }

    /// 重置统计
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// 吞吐摘要
#[derive(Debug, Clone, Default)]
pub struct ThroughputSummary {
    pub streams: BTreeMap<&'static str, (StreamTotals, StatsSummary)>,
}

impl std::fmt::Display for ThroughputSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Fan-out Summary ===")?;
        for (kind, (totals, rate)) in &self.streams {
            writeln!(
                f,
                "{kind}: written={} dropped={} failed={}",
                totals.written, totals.dropped, totals.failed
            )?;
            writeln!(f, "  rate (items/s): {rate}")?;
        }
        Ok(())
    }
}

/// 统计摘要
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.1}, max={:.1}, mean={:.1}, std={:.1} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// 在线统计计算器 (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    /// 添加新值
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            self.m2 += delta * (value - self.mean);
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// 样本方差
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_stats() {
        let mut stats = RunningStats::default();
        for v in [1.0, 2.0, 3.0, 4.0, 5.0] {
            stats.push(v);
        }

        assert_eq!(stats.count(), 5);
        assert!((stats.mean() - 3.0).abs() < 1e-10);
        assert!((stats.min() - 1.0).abs() < 1e-10);
        assert!((stats.max() - 5.0).abs() < 1e-10);
        assert!((stats.variance() - 2.5).abs() < 1e-10);
    }

    #[test]
    fn test_throughput_uses_deltas() {
        let mut agg = ThroughputAggregator::new();
        let second = Duration::from_secs(1);

        agg.sample(StreamKind::Rtp, StreamTotals { written: 100, ..Default::default() }, second);
        agg.sample(StreamKind::Rtp, StreamTotals { written: 300, ..Default::default() }, second);
        // A sink went away and its counters with it
        agg.sample(StreamKind::Rtp, StreamTotals { written: 50, ..Default::default() }, second);

        let summary = agg.summary();
        let (totals, rate) = &summary.streams["rtp"];
        assert_eq!(totals.written, 50);
        assert_eq!(rate.count, 3);
        assert!((rate.max - 200.0).abs() < 1e-10);
        assert!((rate.min - 0.0).abs() < 1e-10);
    }

    #[test]
    fn test_summary_display() {
        let mut agg = ThroughputAggregator::new();
        agg.sample(
            StreamKind::Event,
            StreamTotals {
                written: 10,
                dropped: 2,
                ..Default::default()
            },
            Duration::from_secs(2),
        );

        let output = agg.summary().to_string();
        assert!(output.contains("event: written=10 dropped=2"));
        assert!(output.contains("mean=5.0"));
    }

    #[test]
    fn test_record_helpers_without_recorder() {
        record_sessions(3);
        record_bus_peers(2);
        record_ingest_totals(10, 1, 0);
        record_sink_totals(StreamKind::Rtp, 1, &StreamTotals::default());
    }
}
