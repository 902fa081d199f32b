//! `run` command implementation.

use anyhow::{Context, Result};
use std::time::Duration;
use tracing::info;

use super::config::{finish, load_blueprint};
use super::shutdown_signal;
use crate::cli::RunArgs;
use crate::pipeline::{ProxyRuntime, RuntimeConfig};

/// Execute the `run` command
pub async fn run_proxy(args: &RunArgs) -> Result<()> {
    let mut blueprint = load_blueprint(&args.bus)?;
    if let Some(listen) = args.rtp_listen {
        info!(listen = %listen, "Overriding RTP listen address from CLI");
        blueprint.rtp.listen = listen;
    }
    let blueprint = finish(blueprint)?;

    info!(
        group = %blueprint.bus.multicast_group,
        service = %blueprint.bus.service,
        rtp = %blueprint.rtp.listen,
        codec = %blueprint.session.codec,
        "Configuration loaded"
    );

    if args.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        print_config_summary(&blueprint);
        return Ok(());
    }

    let runtime = ProxyRuntime::new(RuntimeConfig {
        blueprint,
        log_sink: args.log_sink,
        metrics_port: (args.metrics_port != 0).then_some(args.metrics_port),
        stats_interval: Duration::from_secs(args.stats_interval.max(1)),
        timeout: (args.timeout != 0).then(|| Duration::from_secs(args.timeout)),
    });

    let stats = runtime
        .run(shutdown_signal())
        .await
        .context("Proxy execution failed")?;

    info!(
        duration_secs = stats.duration.as_secs_f64(),
        rtp_received = stats.ingest.packets_received,
        "Proxy stopped"
    );
    stats.print_summary();

    Ok(())
}

/// Print configuration summary for dry-run mode
fn print_config_summary(blueprint: &contracts::ProxyBlueprint) {
    println!("\n=== Configuration Summary ===\n");
    println!("Bus:");
    println!("  Group: {}", blueprint.bus.multicast_group);
    println!("  Interface: {}", blueprint.bus.interface);
    println!("  Service: {}", blueprint.bus.service);
    println!(
        "  Announce every {}ms, peer ttl {}ms",
        blueprint.bus.announce_interval_ms, blueprint.bus.peer_ttl_ms
    );
    println!("  Delivery target: {:?}", blueprint.bus.delivery_target);

    println!("\nRTP:");
    println!("  Listen: {}", blueprint.rtp.listen);
    println!("  SSRC: {:#010x}", blueprint.rtp.ssrc);

    println!("\nSessions:");
    println!("  Codec: {}", blueprint.session.codec);
    println!(
        "  Data channel frame: {} bytes",
        blueprint.session.data_channel_frame_bytes
    );

    println!("\nSinks:");
    println!(
        "  Queues: rtp={} event={}",
        blueprint.sinks.rtp_queue_capacity, blueprint.sinks.event_queue_capacity
    );
    println!("  Drop policy: {:?}", blueprint.sinks.drop_policy);
    if blueprint.sinks.max_consecutive_drops > 0 {
        println!(
            "  Disconnect after {} consecutive drops",
            blueprint.sinks.max_consecutive_drops
        );
    }

    println!();
}
