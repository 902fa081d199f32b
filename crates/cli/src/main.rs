//! # webrtc-proxy CLI
//!
//! 命令行接口入口点。
//!
//! 提供：
//! - 配置加载、覆盖与验证
//! - 代理运行时编排与生命周期管理
//! - 事件总线监听 / 发布工具
//! - 优雅关闭处理

mod cli;
mod commands;
mod pipeline;

use anyhow::{Context, Result};
use clap::Parser;
use observability::ObservabilityConfig;
use tracing::info;

use cli::{BusCommand, Cli, Commands};
use commands::{run_bus_listen, run_bus_publish, run_proxy, run_validate};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    init_logging(&cli)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "webrtc-proxy starting"
    );

    let result = match &cli.command {
        Commands::Run(args) => run_proxy(args).await,
        Commands::Bus(BusCommand::Listen(args)) => run_bus_listen(args).await,
        Commands::Bus(BusCommand::Publish(args)) => run_bus_publish(args).await,
        Commands::Validate(args) => run_validate(args),
    };

    if let Err(ref e) = result {
        tracing::error!(error = %e, "Command failed");
    }

    result
}

/// Initialize logging based on CLI options
///
/// The Prometheus exporter is installed later, by `run`, when enabled.
fn init_logging(cli: &Cli) -> Result<()> {
    let default_log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    observability::init_with_config(ObservabilityConfig {
        log_format: cli.log_format.into(),
        metrics_port: None,
        default_log_level: default_log_level.to_string(),
    })
    .context("Failed to initialize logging")
}
