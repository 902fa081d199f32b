//! Bus wire format
//!
//! Protocol buffers, field-compatible with `farm_ng.core.Announce` and
//! `farm_ng.core.Event`, so the bus and the data channel interoperate with
//! the other bus participants and the browser client. Timestamps and
//! payloads use the well-known `google.protobuf.Timestamp` and
//! `google.protobuf.Any`.
//!
//! The presence socket carries only announcements. The event socket
//! carries events plus the direct re-announcements peers unicast to it;
//! field 2 tells them apart (`name` is length-delimited, `port` a varint),
//! so a well-formed datagram decodes as at most one of the two.

use prost::Message;

use crate::{Announcement, ContractError, Event, Payload, Timestamp};

/// Datagram size bound for presence and event packets
pub const MAX_DATAGRAM_SIZE: usize = 1024;

#[derive(Clone, PartialEq, Message)]
struct AnnounceProto {
    #[prost(string, tag = "1")]
    host: String,
    #[prost(int32, tag = "2")]
    port: i32,
    #[prost(string, tag = "3")]
    service: String,
    #[prost(message, optional, tag = "4")]
    stamp: Option<prost_types::Timestamp>,
    #[prost(message, optional, tag = "5")]
    recv_stamp: Option<prost_types::Timestamp>,
}

#[derive(Clone, PartialEq, Message)]
struct EventProto {
    #[prost(message, optional, tag = "1")]
    stamp: Option<prost_types::Timestamp>,
    #[prost(string, tag = "2")]
    name: String,
    #[prost(message, optional, tag = "3")]
    data: Option<prost_types::Any>,
}

/// A datagram read from the event socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Datagram {
    Announce(Announcement),
    Event(Event),
}

impl Datagram {
    /// Decode an event-socket datagram: an event, else a direct re-announcement.
    pub fn decode(bytes: &[u8]) -> Result<Self, ContractError> {
        match Event::decode(bytes) {
            Ok(event) => Ok(Datagram::Event(event)),
            Err(e) if !e.is_decode() => Err(e),
            Err(e) => Announcement::decode(bytes)
                .map(Datagram::Announce)
                .map_err(|_| e),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ContractError> {
        match self {
            Datagram::Announce(a) => a.encode(),
            Datagram::Event(e) => e.encode(),
        }
    }
}

fn bounded(what: &'static str, bytes: Vec<u8>) -> Result<Vec<u8>, ContractError> {
    if bytes.len() > MAX_DATAGRAM_SIZE {
        return Err(ContractError::Oversized {
            what,
            size: bytes.len(),
            max: MAX_DATAGRAM_SIZE,
        });
    }
    Ok(bytes)
}

fn check_inbound(what: &'static str, bytes: &[u8]) -> Result<(), ContractError> {
    if bytes.len() > MAX_DATAGRAM_SIZE {
        return Err(ContractError::Oversized {
            what,
            size: bytes.len(),
            max: MAX_DATAGRAM_SIZE,
        });
    }
    Ok(())
}

impl From<Timestamp> for prost_types::Timestamp {
    fn from(ts: Timestamp) -> Self {
        Self {
            seconds: ts.seconds,
            nanos: ts.nanos,
        }
    }
}

impl From<prost_types::Timestamp> for Timestamp {
    fn from(ts: prost_types::Timestamp) -> Self {
        Self {
            seconds: ts.seconds,
            nanos: ts.nanos,
        }
    }
}

impl Announcement {
    pub fn encode(&self) -> Result<Vec<u8>, ContractError> {
        let proto = AnnounceProto {
            host: self.host.clone(),
            port: i32::from(self.port),
            service: self.service.clone(),
            stamp: Some(self.sent_at.into()),
            recv_stamp: self.received_at.map(Into::into),
        };
        bounded("announcement", proto.encode_to_vec())
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ContractError> {
        check_inbound("announcement", bytes)?;
        let proto = AnnounceProto::decode(bytes)
            .map_err(|e| ContractError::decode("announcement", e.to_string()))?;
        let port = u16::try_from(proto.port).map_err(|_| {
            ContractError::decode("announcement", format!("port {} out of range", proto.port))
        })?;
        Ok(Self {
            host: proto.host,
            port,
            service: proto.service,
            sent_at: proto.stamp.map(Into::into).unwrap_or_default(),
            received_at: proto.recv_stamp.map(Into::into),
        })
    }
}

impl Event {
    pub fn encode(&self) -> Result<Vec<u8>, ContractError> {
        let data = self.data();
        let proto = EventProto {
            stamp: Some(self.stamp().into()),
            name: self.name().to_string(),
            data: Some(prost_types::Any {
                type_url: data.type_url.clone(),
                value: data.value.to_vec(),
            }),
        };
        bounded("event", proto.encode_to_vec())
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ContractError> {
        check_inbound("event", bytes)?;
        let proto =
            EventProto::decode(bytes).map_err(|e| ContractError::decode("event", e.to_string()))?;
        let data = proto
            .data
            .map(|any| Payload::new(any.type_url, any.value))
            .unwrap_or_default();
        Ok(Event::with_stamp(
            proto.name,
            proto.stamp.map(Into::into).unwrap_or_default(),
            data,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> Event {
        Event::with_stamp(
            "ipc/status",
            Timestamp {
                seconds: 1_600_000_000,
                nanos: 42,
            },
            Payload::text("ok"),
        )
    }

    #[test]
    fn test_event_bytes_round_trip() {
        let bytes = sample_event().encode().unwrap();
        let decoded = Event::decode(&bytes).unwrap();
        assert_eq!(decoded, sample_event());
        assert_eq!(decoded.encode().unwrap(), bytes);
    }

    #[test]
    fn test_announcement_bytes_round_trip() {
        let announce = Announcement::new("192.168.1.7", 40123, "go-ipc");
        let bytes = announce.encode().unwrap();
        let decoded = Announcement::decode(&bytes).unwrap();
        assert_eq!(decoded, announce);
        assert_eq!(decoded.encode().unwrap(), bytes);
    }

    #[test]
    fn test_decodes_hand_built_protobuf_event() {
        // Event{stamp{seconds:5}, name:"status", data{type_url:"t", value:"v"}}
        let mut bytes = vec![0x0a, 0x02, 0x08, 0x05];
        bytes.extend_from_slice(&[0x12, 0x06]);
        bytes.extend_from_slice(b"status");
        bytes.extend_from_slice(&[0x1a, 0x06, 0x0a, 0x01, b't', 0x12, 0x01, b'v']);

        let event = Event::decode(&bytes).unwrap();
        assert_eq!(event.name(), "status");
        assert_eq!(event.stamp().seconds, 5);
        assert_eq!(event.data().type_url, "t");
        assert_eq!(&event.data().value[..], b"v");
        assert_eq!(event.encode().unwrap(), bytes);
    }

    #[test]
    fn test_decodes_hand_built_protobuf_announce() {
        // Announce{host:"10.0.0.9", port:4000, service:"go-ipc"}
        let mut bytes = vec![0x0a, 0x08];
        bytes.extend_from_slice(b"10.0.0.9");
        bytes.extend_from_slice(&[0x10, 0xa0, 0x1f, 0x1a, 0x06]);
        bytes.extend_from_slice(b"go-ipc");

        let announce = Announcement::decode(&bytes).unwrap();
        assert_eq!(announce.host, "10.0.0.9");
        assert_eq!(announce.port, 4000);
        assert_eq!(announce.service, "go-ipc");
        assert_eq!(announce.received_at, None);
    }

    #[test]
    fn test_event_socket_datagram_kinds() {
        let bytes = sample_event().encode().unwrap();
        assert_eq!(Datagram::decode(&bytes).unwrap(), Datagram::Event(sample_event()));
        assert!(Announcement::decode(&bytes).unwrap_err().is_decode());

        let announce = Announcement::new("127.0.0.1", 5555, "webrtc-proxy");
        let bytes = announce.encode().unwrap();
        assert_eq!(Datagram::decode(&bytes).unwrap(), Datagram::Announce(announce));
    }

    #[test]
    fn test_garbage_is_decode_error() {
        for garbage in [&[0xff; 3][..], &[0x0a, 0x50, 1, 2][..], &b"not an event"[..]] {
            let err = Datagram::decode(garbage).unwrap_err();
            assert!(err.is_decode(), "unexpected error: {err}");
        }
    }

    #[test]
    fn test_trailing_zero_byte_rejected() {
        let mut bytes = sample_event().encode().unwrap();
        bytes.push(0);
        assert!(Event::decode(&bytes).is_err());
    }

    #[test]
    fn test_out_of_range_port_rejected() {
        // Announce{port: 70000}
        let bytes = [0x10, 0xf0, 0xa2, 0x04];
        assert!(Announcement::decode(&bytes).unwrap_err().is_decode());
    }

    #[test]
    fn test_oversized_event_rejected() {
        let event = Event::new("big", Payload::raw(vec![0u8; MAX_DATAGRAM_SIZE]));
        assert!(matches!(
            event.encode(),
            Err(ContractError::Oversized { what: "event", .. })
        ));
    }
}
