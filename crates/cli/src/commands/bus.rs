//! `bus listen` / `bus publish` implementations.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use contracts::{Event, Payload};
use eventbus::EventBus;
use tokio::sync::watch;
use tracing::{info, warn};

use super::config::{finish, load_blueprint};
use super::shutdown_signal;
use crate::cli::{ListenArgs, PublishArgs};

/// Join the bus and log every event until signalled
pub async fn run_bus_listen(args: &ListenArgs) -> Result<()> {
    let blueprint = finish(load_blueprint(&args.bus)?)?;
    let (delivery_tx, delivery_rx) =
        async_channel::bounded::<Event>(blueprint.bus.delivery_queue_capacity);

    let bus = Arc::new(
        EventBus::bind(blueprint.bus.clone(), Some(delivery_tx))
            .context("Failed to join the event bus")?,
    );
    let (stop_tx, stop_rx) = watch::channel(false);
    let bus_task = tokio::spawn(Arc::clone(&bus).run(stop_rx));

    info!(group = %blueprint.bus.multicast_group, "Listening for events");

    let listen = async {
        while let Ok(event) = delivery_rx.recv().await {
            let data = event.data();
            info!(
                name = event.name(),
                stamp = %event.stamp(),
                type_url = %data.type_url,
                bytes = data.value.len(),
                text = data.as_text().unwrap_or_default(),
                "Event received"
            );
        }
    };

    tokio::select! {
        _ = listen => warn!("Delivery queue closed"),
        _ = shutdown_signal() => info!("Received shutdown signal"),
    }

    let _ = stop_tx.send(true);
    bus_task.await.context("Event bus task failed")?;

    if args.state {
        let mut state: Vec<_> = bus.state().into_iter().collect();
        state.sort_by(|a, b| a.0.cmp(&b.0));
        println!("\n=== Latest events ({}) ===", state.len());
        for (name, event) in state {
            let data = event.data();
            println!(
                "  {name} @ {} [{}] {}",
                event.stamp(),
                data.type_url,
                data.as_text().unwrap_or("<binary>")
            );
        }
        println!("\n=== Peers ({}) ===", bus.peer_count());
        for (source, announcement) in bus.announcements() {
            println!(
                "  {source} -> {}:{} ({})",
                announcement.host, announcement.port, announcement.service
            );
        }
    }

    Ok(())
}

/// Join the bus, wait for announcements, send one event
pub async fn run_bus_publish(args: &PublishArgs) -> Result<()> {
    let blueprint = finish(load_blueprint(&args.bus)?)?;
    let bus = Arc::new(
        EventBus::bind(blueprint.bus.clone(), None).context("Failed to join the event bus")?,
    );
    let (stop_tx, stop_rx) = watch::channel(false);
    let bus_task = tokio::spawn(Arc::clone(&bus).run(stop_rx));

    tokio::time::sleep(Duration::from_millis(args.discover_ms)).await;

    let event = Event::new(args.name.clone(), Payload::text(args.text.clone()));
    let targets = bus
        .send_event(&event)
        .await
        .context("Failed to send event")?;
    info!(name = %args.name, targets, "Event published");
    println!("Sent '{}' to {} peer(s)", args.name, targets);

    let _ = stop_tx.send(true);
    bus_task.await.context("Event bus task failed")?;
    Ok(())
}
