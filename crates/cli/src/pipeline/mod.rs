//! Proxy runtime orchestration module.

mod orchestrator;
mod stats;

pub use orchestrator::{ProxyRuntime, RuntimeConfig};
pub use stats::RunStats;
