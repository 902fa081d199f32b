//! Announcement table - live bus peers with staleness eviction

use std::collections::{BTreeSet, HashMap};
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, SystemTime};

use contracts::{Announcement, DeliveryTarget};
use parking_lot::Mutex;
use tracing::{debug, warn};

/// Live peers keyed by the UDP source address of their presence packets.
///
/// One coarse lock covers every operation; the table holds tens of entries.
#[derive(Debug, Default)]
pub struct AnnouncementTable {
    entries: Mutex<HashMap<SocketAddr, Announcement>>,
}

impl AnnouncementTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh a peer. `announcement.received_at` must already be
    /// stamped locally; an unstamped entry is evicted by the next sweep.
    pub fn upsert(&self, source: SocketAddr, announcement: Announcement) {
        self.entries.lock().insert(source, announcement);
    }

    /// Refresh the receive stamp of the peer that sent `announcement` from
    /// its event socket: same IP, advertised port equal to the source port.
    ///
    /// Never inserts. Returns whether an entry matched.
    pub fn refresh(&self, source: SocketAddr, announcement: &Announcement) -> bool {
        let mut refreshed = false;
        for (key, entry) in self.entries.lock().iter_mut() {
            if key.ip() == source.ip() && entry.port == source.port() {
                entry.received_at = announcement.received_at;
                refreshed = true;
            }
        }
        refreshed
    }

    /// Remove every entry whose receive time is older than `ttl` at `now`.
    ///
    /// Entries with a missing or unrepresentable receive timestamp are
    /// removed too. Returns the removed keys.
    pub fn sweep_stale(&self, now: SystemTime, ttl: Duration) -> Vec<SocketAddr> {
        let mut removed = Vec::new();
        self.entries.lock().retain(|source, announcement| {
            let keep = match is_live(announcement, now, ttl) {
                Ok(live) => live,
                Err(e) => {
                    warn!(peer = %source, error = %e, "dropping peer with invalid receive stamp");
                    false
                }
            };
            if !keep {
                removed.push(*source);
            }
            keep
        });
        if !removed.is_empty() {
            debug!(removed = removed.len(), "evicted stale peers");
        }
        removed
    }

    /// Copy of the current table, for iteration outside the lock.
    pub fn snapshot(&self) -> Vec<(SocketAddr, Announcement)> {
        self.entries
            .lock()
            .iter()
            .map(|(source, announcement)| (*source, announcement.clone()))
            .collect()
    }

    /// Distinct delivery addresses of peers still live at `now`.
    ///
    /// Filters on age as well, so a peer past its ttl is never targeted
    /// even if the sweep has not run yet.
    pub fn live_targets(
        &self,
        now: SystemTime,
        ttl: Duration,
        target: DeliveryTarget,
    ) -> Vec<SocketAddr> {
        let entries = self.entries.lock();
        let targets: BTreeSet<SocketAddr> = entries
            .iter()
            .filter(|(_, announcement)| is_live(announcement, now, ttl).unwrap_or(false))
            .filter_map(|(source, announcement)| delivery_addr(*source, announcement, target))
            .collect();
        targets.into_iter().collect()
    }

    pub fn contains(&self, source: &SocketAddr) -> bool {
        self.entries.lock().contains_key(source)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

fn is_live(
    announcement: &Announcement,
    now: SystemTime,
    ttl: Duration,
) -> Result<bool, contracts::ContractError> {
    let received_at = announcement.received_at.ok_or_else(|| {
        contracts::ContractError::Other("announcement was never stamped".to_string())
    })?;
    Ok(received_at.age_at(now)? <= ttl)
}

/// Where events for this peer are unicast. `None` when the peer advertised port 0.
pub fn delivery_addr(
    source: SocketAddr,
    announcement: &Announcement,
    target: DeliveryTarget,
) -> Option<SocketAddr> {
    if announcement.port == 0 {
        return None;
    }
    let ip = match target {
        DeliveryTarget::SourceHost => source.ip(),
        DeliveryTarget::SelfReported => announcement
            .host
            .parse::<IpAddr>()
            .ok()
            .filter(|ip| !ip.is_unspecified())
            .unwrap_or_else(|| source.ip()),
    };
    Some(SocketAddr::new(ip, announcement.port))
}
