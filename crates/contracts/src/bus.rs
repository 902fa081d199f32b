//! Announcement / Event - EventBus data model
//!
//! Presence packets and application events exchanged over the bus.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::ContractError;

/// 0001-01-01T00:00:00Z
const MIN_SECONDS: i64 = -62_135_596_800;
/// 9999-12-31T23:59:59Z
const MAX_SECONDS: i64 = 253_402_300_799;
const NANOS_PER_SECOND: i32 = 1_000_000_000;

/// Wall-clock timestamp
///
/// Seconds and nanoseconds since the Unix epoch. `nanos` is always
/// non-negative; instants before the epoch use negative `seconds`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timestamp {
    pub seconds: i64,
    pub nanos: i32,
}

impl Timestamp {
    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    pub fn from_system_time(time: SystemTime) -> Self {
        match time.duration_since(UNIX_EPOCH) {
            Ok(since) => Self {
                seconds: since.as_secs() as i64,
                nanos: since.subsec_nanos() as i32,
            },
            Err(e) => {
                let before = e.duration();
                let mut seconds = -(before.as_secs() as i64);
                let mut nanos = -(before.subsec_nanos() as i32);
                if nanos < 0 {
                    seconds -= 1;
                    nanos += NANOS_PER_SECOND;
                }
                Self { seconds, nanos }
            }
        }
    }

    /// Check the value is inside the representable range
    pub fn validate(&self) -> Result<(), ContractError> {
        let in_range = (MIN_SECONDS..=MAX_SECONDS).contains(&self.seconds)
            && (0..NANOS_PER_SECOND).contains(&self.nanos);
        if in_range {
            Ok(())
        } else {
            Err(ContractError::InvalidTimestamp {
                seconds: self.seconds,
                nanos: self.nanos,
            })
        }
    }

    pub fn to_system_time(&self) -> Result<SystemTime, ContractError> {
        self.validate()?;
        let invalid = || ContractError::InvalidTimestamp {
            seconds: self.seconds,
            nanos: self.nanos,
        };
        let whole = if self.seconds >= 0 {
            UNIX_EPOCH.checked_add(Duration::from_secs(self.seconds as u64))
        } else {
            UNIX_EPOCH.checked_sub(Duration::from_secs(self.seconds.unsigned_abs()))
        };
        whole
            .and_then(|t| t.checked_add(Duration::from_nanos(self.nanos as u64)))
            .ok_or_else(invalid)
    }

    /// Age of this timestamp relative to `now`; future timestamps have zero age.
    pub fn age_at(&self, now: SystemTime) -> Result<Duration, ContractError> {
        let then = self.to_system_time()?;
        Ok(now.duration_since(then).unwrap_or(Duration::ZERO))
    }

    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        self.validate().ok()?;
        DateTime::from_timestamp(self.seconds, self.nanos as u32)
    }
}

impl From<SystemTime> for Timestamp {
    fn from(time: SystemTime) -> Self {
        Self::from_system_time(time)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(dt) => f.write_str(&dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
            None => write!(f, "<invalid {}s {}ns>", self.seconds, self.nanos),
        }
    }
}

/// Presence packet
///
/// Identifies one live bus participant. `host`/`port` are the sender's
/// self-reported event receive address. `received_at` is stamped locally
/// on receipt; whatever the sender put there is overwritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    pub host: String,
    pub port: u16,
    pub service: String,
    pub sent_at: Timestamp,
    pub received_at: Option<Timestamp>,
}

impl Announcement {
    /// Build an outgoing announcement stamped with the current time.
    pub fn new(host: impl Into<String>, port: u16, service: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            service: service.into(),
            sent_at: Timestamp::now(),
            received_at: None,
        }
    }

    /// Copy of this announcement with `received_at` set locally.
    pub fn stamped(mut self, received_at: Timestamp) -> Self {
        self.received_at = Some(received_at);
        self
    }
}

/// Opaque typed event payload
///
/// `type_url` names the encoding of `value` (empty for raw bytes).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub type_url: String,
    pub value: Bytes,
}

/// Type URL used by [`Payload::text`]
pub const TEXT_TYPE_URL: &str = "text/plain";

impl Payload {
    pub fn new(type_url: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self {
            type_url: type_url.into(),
            value: value.into(),
        }
    }

    pub fn raw(value: impl Into<Bytes>) -> Self {
        Self::new("", value)
    }

    pub fn text(value: impl Into<String>) -> Self {
        Self::new(TEXT_TYPE_URL, Bytes::from(value.into()))
    }

    /// The payload as UTF-8 text, if it was built with [`Payload::text`].
    pub fn as_text(&self) -> Option<&str> {
        if self.type_url == TEXT_TYPE_URL {
            std::str::from_utf8(&self.value).ok()
        } else {
            None
        }
    }
}

/// Application-level pub/sub event
///
/// Immutable after construction. The bus keeps only the latest event per `name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    name: String,
    stamp: Timestamp,
    data: Payload,
}

impl Event {
    /// Build an event stamped with the current time.
    pub fn new(name: impl Into<String>, data: Payload) -> Self {
        Self::with_stamp(name, Timestamp::now(), data)
    }

    pub fn with_stamp(name: impl Into<String>, stamp: Timestamp, data: Payload) -> Self {
        Self {
            name: name.into(),
            stamp,
            data,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stamp(&self) -> Timestamp {
        self.stamp
    }

    pub fn data(&self) -> &Payload {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_system_time_round_trip() {
        let now = SystemTime::now();
        let ts = Timestamp::from_system_time(now);
        assert_eq!(ts.to_system_time().unwrap(), now);
    }

    #[test]
    fn test_timestamp_before_epoch() {
        let t = UNIX_EPOCH - Duration::from_millis(1500);
        let ts = Timestamp::from_system_time(t);
        assert_eq!(ts.seconds, -2);
        assert_eq!(ts.nanos, 500_000_000);
        assert_eq!(ts.to_system_time().unwrap(), t);
    }

    #[test]
    fn test_timestamp_rejects_out_of_range() {
        let bad_nanos = Timestamp {
            seconds: 10,
            nanos: -1,
        };
        assert!(matches!(
            bad_nanos.to_system_time(),
            Err(ContractError::InvalidTimestamp { .. })
        ));

        let bad_seconds = Timestamp {
            seconds: i64::MAX,
            nanos: 0,
        };
        assert!(bad_seconds.validate().is_err());
        assert!(bad_seconds.to_datetime().is_none());
    }

    #[test]
    fn test_timestamp_age() {
        let base = UNIX_EPOCH + Duration::from_secs(1_000);
        let ts = Timestamp::from_system_time(base);
        assert_eq!(
            ts.age_at(base + Duration::from_secs(11)).unwrap(),
            Duration::from_secs(11)
        );
        // Sender clock ahead of ours
        assert_eq!(ts.age_at(base - Duration::from_secs(3)).unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_timestamp_display() {
        let ts = Timestamp {
            seconds: 0,
            nanos: 0,
        };
        assert_eq!(ts.to_string(), "1970-01-01T00:00:00.000Z");
    }

    #[test]
    fn test_announcement_stamped_overwrites_sender_value() {
        let mut announce = Announcement::new("10.0.0.2", 4000, "camera");
        announce.received_at = Some(Timestamp {
            seconds: 1,
            nanos: 0,
        });
        let local = Timestamp::now();
        let stamped = announce.stamped(local);
        assert_eq!(stamped.received_at, Some(local));
    }

    #[test]
    fn test_payload_text() {
        let payload = Payload::text("hello");
        assert_eq!(payload.as_text(), Some("hello"));
        assert_eq!(Payload::raw(vec![1u8, 2]).as_text(), None);
    }
}
