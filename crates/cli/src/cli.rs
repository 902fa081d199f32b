//! CLI argument definitions using clap.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;

/// webrtc-proxy - LAN event bus and WebRTC fan-out proxy
#[derive(Parser, Debug)]
#[command(
    name = "webrtc-proxy",
    author,
    version,
    about = "LAN event bus and WebRTC fan-out proxy",
    long_about = "Replicates named events between LAN processes over a multicast-discovered \n\
                  bus, and fans one RTP video stream plus the bus events out to browser \n\
                  peer sessions."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "WEBRTC_PROXY_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "WEBRTC_PROXY_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the proxy: event bus, RTP ingest and fan-out
    Run(RunArgs),

    /// Event bus tools
    #[command(subcommand)]
    Bus(BusCommand),

    /// Validate configuration file without running
    Validate(ValidateArgs),
}

/// Overrides shared by every command that joins the bus
#[derive(Args, Debug, Clone, Default)]
pub struct BusOverrides {
    /// Path to configuration file (TOML or JSON); defaults apply when omitted
    #[arg(short, long, env = "WEBRTC_PROXY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the bus multicast group (ip:port)
    #[arg(long, env = "WEBRTC_PROXY_BUS_GROUP")]
    pub bus_group: Option<SocketAddrV4>,

    /// Override the interface used to join the bus group
    #[arg(long, env = "WEBRTC_PROXY_BUS_INTERFACE")]
    pub interface: Option<Ipv4Addr>,

    /// Override the service name announced on the bus
    #[arg(long, env = "WEBRTC_PROXY_SERVICE")]
    pub service: Option<String>,
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub bus: BusOverrides,

    /// Override the RTP listen address (unicast or multicast)
    #[arg(long, env = "WEBRTC_PROXY_RTP_LISTEN")]
    pub rtp_listen: Option<SocketAddr>,

    /// Attach a log sink to both streams
    #[arg(long, env = "WEBRTC_PROXY_LOG_SINK")]
    pub log_sink: bool,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "9000", env = "WEBRTC_PROXY_METRICS_PORT")]
    pub metrics_port: u16,

    /// Seconds between statistics samples
    #[arg(long, default_value = "10", env = "WEBRTC_PROXY_STATS_INTERVAL")]
    pub stats_interval: u64,

    /// Stop after this many seconds (0 = run until signalled)
    #[arg(long, default_value = "0", env = "WEBRTC_PROXY_TIMEOUT")]
    pub timeout: u64,

    /// Validate configuration and exit without running
    #[arg(long)]
    pub dry_run: bool,
}

/// Event bus subcommands
#[derive(Subcommand, Debug)]
pub enum BusCommand {
    /// Join the bus and log every event received
    Listen(ListenArgs),

    /// Join the bus, wait for peers, and send one event
    Publish(PublishArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct ListenArgs {
    #[command(flatten)]
    pub bus: BusOverrides,

    /// Print the latest event per name on exit
    #[arg(long)]
    pub state: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct PublishArgs {
    #[command(flatten)]
    pub bus: BusOverrides,

    /// Event name
    #[arg(long)]
    pub name: String,

    /// Text payload
    #[arg(long, default_value = "")]
    pub text: String,

    /// Milliseconds to listen for announcements before sending
    #[arg(long, default_value = "2500")]
    pub discover_ms: u64,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "proxy.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => observability::LogFormat::Json,
            LogFormat::Pretty => observability::LogFormat::Pretty,
            LogFormat::Compact => observability::LogFormat::Compact,
        }
    }
}
