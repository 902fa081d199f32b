//! Codec resolution against an SDP offer

use crate::error::SessionError;
use crate::transport::{SdpType, SessionDescription};

/// One `a=rtpmap` entry of an offer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfferedCodec {
    /// Media section kind (`video`, `audio`, ...)
    pub media: String,
    pub payload_type: u8,
    pub name: String,
    pub clock_rate: u32,
}

/// Every codec the SDP advertises, in offer order
pub fn offered_codecs(sdp: &str) -> Vec<OfferedCodec> {
    let mut media = String::new();
    let mut codecs = Vec::new();

    for line in sdp.lines().map(str::trim) {
        if let Some(section) = line.strip_prefix("m=") {
            media = section
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .to_string();
        } else if let Some(rtpmap) = line.strip_prefix("a=rtpmap:") {
            if let Some(codec) = parse_rtpmap(&media, rtpmap) {
                codecs.push(codec);
            }
        }
    }
    codecs
}

// "<pt> <name>/<clock>[/<channels>]"
fn parse_rtpmap(media: &str, value: &str) -> Option<OfferedCodec> {
    let (pt, encoding) = value.split_once(' ')?;
    let mut parts = encoding.trim().split('/');
    let name = parts.next()?.to_string();
    let clock_rate = parts.next().and_then(|c| c.parse().ok()).unwrap_or(0);
    Some(OfferedCodec {
        media: media.to_string(),
        payload_type: pt.trim().parse().ok()?,
        name,
        clock_rate,
    })
}

/// Payload type the offer assigned to video codec `codec`.
///
/// Fails with a capability mismatch when no video section offers it.
pub fn resolve_payload_type(offer: &SessionDescription, codec: &str) -> Result<u8, SessionError> {
    if offer.sdp_type != SdpType::Offer {
        return Err(SessionError::InvalidDescription {
            message: "expected an offer".to_string(),
        });
    }
    offered_codecs(&offer.sdp)
        .into_iter()
        .find(|c| c.media == "video" && c.name.eq_ignore_ascii_case(codec) && c.payload_type != 0)
        .map(|c| c.payload_type)
        .ok_or_else(|| SessionError::CapabilityMismatch {
            codec: codec.to_string(),
        })
}
