//! RTP packet codec (RFC 3550 fixed header, CSRC list, header extension)
//!
//! The proxy only rewrites `payload_type` and `ssrc`; everything else is
//! carried through unchanged.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::ContractError;

pub const RTP_VERSION: u8 = 2;
/// Largest RTP datagram read from the ingest socket
pub const MAX_RTP_PACKET_SIZE: usize = 4096;

const FIXED_HEADER_LEN: usize = 12;
const MAX_CSRC: usize = 15;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpExtension {
    pub profile: u16,
    /// Extension body; padded to a 32-bit boundary on marshal
    pub data: Bytes,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RtpHeader {
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub csrc: Vec<u32>,
    pub extension: Option<RtpExtension>,
}

/// One RTP packet; padding is stripped on parse
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RtpPacket {
    pub header: RtpHeader,
    pub payload: Bytes,
}

impl RtpPacket {
    /// Parse a datagram. The payload shares the input buffer.
    pub fn parse(data: Bytes) -> Result<Self, ContractError> {
        if data.len() < FIXED_HEADER_LEN {
            return Err(ContractError::rtp_parse(format!(
                "packet too short: {} bytes",
                data.len()
            )));
        }

        let mut buf = &data[..];
        let b0 = buf.get_u8();
        let version = b0 >> 6;
        if version != RTP_VERSION {
            return Err(ContractError::rtp_parse(format!(
                "unsupported version {version}"
            )));
        }
        let has_padding = b0 & 0x20 != 0;
        let has_extension = b0 & 0x10 != 0;
        let csrc_count = (b0 & 0x0f) as usize;

        let b1 = buf.get_u8();
        let mut header = RtpHeader {
            marker: b1 & 0x80 != 0,
            payload_type: b1 & 0x7f,
            sequence_number: buf.get_u16(),
            timestamp: buf.get_u32(),
            ssrc: buf.get_u32(),
            csrc: Vec::with_capacity(csrc_count),
            extension: None,
        };

        if buf.remaining() < csrc_count * 4 {
            return Err(ContractError::rtp_parse("truncated csrc list"));
        }
        for _ in 0..csrc_count {
            header.csrc.push(buf.get_u32());
        }

        if has_extension {
            if buf.remaining() < 4 {
                return Err(ContractError::rtp_parse("truncated extension header"));
            }
            let profile = buf.get_u16();
            let len = buf.get_u16() as usize * 4;
            if buf.remaining() < len {
                return Err(ContractError::rtp_parse("truncated extension body"));
            }
            let start = data.len() - buf.remaining();
            header.extension = Some(RtpExtension {
                profile,
                data: data.slice(start..start + len),
            });
            buf.advance(len);
        }

        let offset = data.len() - buf.remaining();
        let mut end = data.len();
        if has_padding {
            let pad = data[end - 1] as usize;
            if pad == 0 || pad > end - offset {
                return Err(ContractError::rtp_parse(format!("invalid padding {pad}")));
            }
            end -= pad;
        }

        Ok(Self {
            header,
            payload: data.slice(offset..end),
        })
    }

    pub fn marshal(&self) -> Bytes {
        let header = &self.header;
        let csrc = &header.csrc[..header.csrc.len().min(MAX_CSRC)];
        let ext_len = header
            .extension
            .as_ref()
            .map(|ext| 4 + ext.data.len().div_ceil(4) * 4)
            .unwrap_or(0);

        let mut out =
            BytesMut::with_capacity(FIXED_HEADER_LEN + csrc.len() * 4 + ext_len + self.payload.len());
        let mut b0 = RTP_VERSION << 6 | csrc.len() as u8;
        if header.extension.is_some() {
            b0 |= 0x10;
        }
        out.put_u8(b0);
        out.put_u8((header.marker as u8) << 7 | (header.payload_type & 0x7f));
        out.put_u16(header.sequence_number);
        out.put_u32(header.timestamp);
        out.put_u32(header.ssrc);
        for id in csrc {
            out.put_u32(*id);
        }
        if let Some(ext) = &header.extension {
            let words = ext.data.len().div_ceil(4);
            out.put_u16(ext.profile);
            out.put_u16(words as u16);
            out.put_slice(&ext.data);
            out.put_bytes(0, words * 4 - ext.data.len());
        }
        out.put_slice(&self.payload);
        out.freeze()
    }

    /// Copy of this packet with a different payload type; the payload is shared.
    pub fn with_payload_type(&self, payload_type: u8) -> Self {
        let mut copy = self.clone();
        copy.header.payload_type = payload_type & 0x7f;
        copy
    }
}
