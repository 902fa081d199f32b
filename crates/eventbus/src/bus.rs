//! EventBus - multicast presence + unicast event replication

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;

use async_channel::{Sender, TrySendError};
use contracts::{
    Announcement, BusConfig, Datagram, Event, EventPublisher, Timestamp, MAX_DATAGRAM_SIZE,
};
use metrics::counter;
use parking_lot::RwLock;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::error::Result;
use crate::socket::{advertised_ip, BusSockets};
use crate::table::AnnouncementTable;

#[derive(Debug, Clone, Copy)]
enum Channel {
    Presence,
    Events,
}

impl Channel {
    fn as_str(self) -> &'static str {
        match self {
            Channel::Presence => "presence",
            Channel::Events => "events",
        }
    }
}

/// One bus participant
///
/// Owns its sockets, the announcement table and the bus-local state
/// (latest event per name). Call [`EventBus::run`] to start the loops.
pub struct EventBus {
    config: BusConfig,
    table: AnnouncementTable,
    state: RwLock<HashMap<String, Event>>,
    presence_tx: UdpSocket,
    presence_rx: UdpSocket,
    events: UdpSocket,
    presence_dest: SocketAddr,
    local_host: String,
    local_port: u16,
    delivery: Option<Sender<Event>>,
}

impl EventBus {
    /// Bind the bus sockets described by `config`.
    ///
    /// Received events are forwarded to `delivery` when given. Must be
    /// called inside a tokio runtime.
    pub fn bind(config: BusConfig, delivery: Option<Sender<Event>>) -> Result<Self> {
        let sockets = BusSockets::bind(&config)?;
        Self::from_sockets(config, sockets, delivery)
    }

    pub fn from_sockets(
        config: BusConfig,
        sockets: BusSockets,
        delivery: Option<Sender<Event>>,
    ) -> Result<Self> {
        let events_addr = sockets.events.local_addr()?;
        let local_host = advertised_ip(events_addr.ip(), sockets.presence_dest).to_string();

        info!(
            group = %sockets.presence_dest,
            events = %events_addr,
            advertised = %local_host,
            service = %config.service,
            "event bus bound"
        );

        Ok(Self {
            table: AnnouncementTable::new(),
            state: RwLock::new(HashMap::new()),
            presence_tx: UdpSocket::from_std(sockets.presence_tx)?,
            presence_rx: UdpSocket::from_std(sockets.presence_rx)?,
            events: UdpSocket::from_std(sockets.events)?,
            presence_dest: sockets.presence_dest,
            local_port: events_addr.port(),
            local_host,
            delivery,
            config,
        })
    }

    /// Run the announce, presence-receive and event-receive loops until
    /// `shutdown` flips to `true`.
    ///
    /// A socket read failure ends only the loop that hit it.
    #[instrument(name = "event_bus_run", skip_all, fields(service = %self.config.service))]
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        let mut loops = JoinSet::new();
        loops.spawn(Arc::clone(&self).announce_loop(shutdown.clone()));
        loops.spawn(Arc::clone(&self).receive_loop(Channel::Presence, shutdown.clone()));
        loops.spawn(Arc::clone(&self).receive_loop(Channel::Events, shutdown));

        info!("event bus started");
        while let Some(joined) = loops.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "event bus loop panicked");
            }
        }
        info!("event bus stopped");
    }

    async fn announce_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.announce_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.wait_for(|stop| *stop) => break,
                _ = interval.tick() => {}
            }
            self.announce_once().await;
        }
        debug!("announce loop stopped");
    }

    async fn receive_loop(self: Arc<Self>, channel: Channel, mut shutdown: watch::Receiver<bool>) {
        let socket = match channel {
            Channel::Presence => &self.presence_rx,
            Channel::Events => &self.events,
        };
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            let received = tokio::select! {
                _ = shutdown.wait_for(|stop| *stop) => break,
                received = socket.recv_from(&mut buf) => received,
            };
            match received {
                Ok((len, source)) => self.handle_datagram(channel, &buf[..len], source),
                Err(e) => {
                    error!(channel = channel.as_str(), error = %e, "bus socket read failed, loop ending");
                    break;
                }
            }
        }
        debug!(channel = channel.as_str(), "receive loop stopped");
    }

    /// One presence cycle: announce to the group, evict stale peers, then
    /// re-announce directly to every peer still live.
    pub async fn announce_once(&self) {
        let announcement = self.local_announcement();
        let bytes = match announcement.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(error = %e, "failed to encode announcement");
                return;
            }
        };

        if let Err(e) = self.presence_tx.send_to(&bytes, self.presence_dest).await {
            warn!(group = %self.presence_dest, error = %e, "presence send failed");
        }

        let now = SystemTime::now();
        let ttl = self.config.peer_ttl();
        for peer in self.table.sweep_stale(now, ttl) {
            info!(peer = %peer, "peer went stale");
            counter!("webrtc_proxy_bus_peers_evicted_total").increment(1);
        }

        for target in self
            .table
            .live_targets(now, ttl, self.config.delivery_target)
        {
            if let Err(e) = self.events.send_to(&bytes, target).await {
                debug!(peer = %target, error = %e, "direct announce failed");
            }
        }
    }

    fn handle_datagram(&self, channel: Channel, bytes: &[u8], source: SocketAddr) {
        let decoded = match channel {
            Channel::Presence => Announcement::decode(bytes).map(Datagram::Announce),
            Channel::Events => Datagram::decode(bytes),
        };
        let datagram = match decoded {
            Ok(datagram) => datagram,
            Err(e) => {
                warn!(
                    channel = channel.as_str(),
                    peer = %source,
                    bytes = bytes.len(),
                    error = %e,
                    "dropping malformed datagram"
                );
                counter!("webrtc_proxy_bus_decode_errors_total", "channel" => channel.as_str())
                    .increment(1);
                return;
            }
        };

        match (channel, datagram) {
            (Channel::Presence, Datagram::Announce(announcement)) => {
                self.record_announcement(source, announcement)
            }
            (Channel::Events, Datagram::Announce(announcement)) => {
                self.refresh_announcement(source, announcement)
            }
            (Channel::Events, Datagram::Event(event)) => self.record_event(source, event),
            (Channel::Presence, Datagram::Event(_)) => {}
        }
    }

    /// A peer's direct re-announcement, sent from its event socket. Only
    /// presence packets create table entries; this refreshes the matching one.
    fn refresh_announcement(&self, source: SocketAddr, announcement: Announcement) {
        let stamped = announcement.stamped(Timestamp::now());
        if self.table.refresh(source, &stamped) {
            trace!(peer = %source, "direct announcement refreshed peer");
        } else {
            trace!(peer = %source, "direct announcement from unknown peer ignored");
        }
    }

    fn record_announcement(&self, source: SocketAddr, announcement: Announcement) {
        trace!(
            peer = %source,
            host = %announcement.host,
            port = announcement.port,
            service = %announcement.service,
            "announcement received"
        );
        counter!("webrtc_proxy_bus_announcements_received_total").increment(1);
        if !self.table.contains(&source) {
            info!(peer = %source, service = %announcement.service, "peer discovered");
        }
        self.table
            .upsert(source, announcement.stamped(Timestamp::now()));
    }

    fn record_event(&self, source: SocketAddr, event: Event) {
        trace!(peer = %source, name = event.name(), "event received");
        counter!("webrtc_proxy_bus_events_received_total").increment(1);
        self.state
            .write()
            .insert(event.name().to_string(), event.clone());

        let Some(delivery) = &self.delivery else {
            return;
        };
        match delivery.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                counter!("webrtc_proxy_bus_events_dropped_total").increment(1);
                warn!(name = event.name(), "delivery queue full, event dropped");
            }
            Err(TrySendError::Closed(_)) => {
                trace!("delivery receiver gone");
            }
        }
    }

    /// Unicast `event` to every live peer. Returns how many sends succeeded.
    ///
    /// Best-effort: no acknowledgment and no retry. Only encoding errors
    /// are returned; per-peer send failures are logged.
    pub async fn send_event(&self, event: &Event) -> Result<usize> {
        let bytes = event.encode()?;
        let targets = self.table.live_targets(
            SystemTime::now(),
            self.config.peer_ttl(),
            self.config.delivery_target,
        );

        let mut sent = 0;
        for target in targets {
            match self.events.send_to(&bytes, target).await {
                Ok(_) => sent += 1,
                Err(e) => warn!(peer = %target, name = event.name(), error = %e, "event send failed"),
            }
        }
        counter!("webrtc_proxy_bus_events_sent_total").increment(sent as u64);
        trace!(name = event.name(), peers = sent, "event replicated");
        Ok(sent)
    }

    /// The announcement this node sends, stamped now.
    pub fn local_announcement(&self) -> Announcement {
        Announcement::new(self.local_host.clone(), self.local_port, self.config.service.clone())
    }

    /// Address of the unicast event socket.
    pub fn events_addr(&self) -> Result<SocketAddr> {
        Ok(self.events.local_addr()?)
    }

    /// Latest event received under `name`.
    pub fn latest(&self, name: &str) -> Option<Event> {
        self.state.read().get(name).cloned()
    }

    /// Copy of the bus-local state.
    pub fn state(&self) -> HashMap<String, Event> {
        self.state.read().clone()
    }

    /// Copy of the announcement table.
    pub fn announcements(&self) -> Vec<(SocketAddr, Announcement)> {
        self.table.snapshot()
    }

    pub fn peer_count(&self) -> usize {
        self.table.len()
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }
}

impl EventPublisher for EventBus {
    async fn publish(&self, event: Event) {
        if let Err(e) = self.send_event(&event).await {
            warn!(name = event.name(), error = %e, "failed to publish event");
        }
    }
}
