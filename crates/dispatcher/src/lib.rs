//! # Dispatcher
//!
//! 数据分发模块。
//!
//! 负责：
//! - 维护每种流 (RTP / 事件) 的会话 sink 表
//! - Fan-out 每个输入到当前所有 sinks
//! - 隔离慢 sink，不阻塞主链路 (有界队列 + 丢包策略)

pub mod dispatcher;
pub mod error;
pub mod handle;
pub mod metrics;
pub mod registry;
pub mod sinks;

pub use contracts::DataSink;
pub use dispatcher::{DispatchStats, Dispatcher, DispatcherConfig};
pub use error::DispatcherError;
pub use handle::SinkHandle;
pub use metrics::{MetricsSnapshot, SinkMetrics};
pub use registry::{SinkRegistry, SinkSnapshot};
pub use sinks::LogSink;
