//! Layered error definitions
//!
//! Categorized by source: config / wire / rtp / sink

use thiserror::Error;

/// Unified error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== Wire Errors =====
    /// A bus datagram or data-channel frame could not be decoded
    #[error("decode error for {what}: {message}")]
    Decode { what: &'static str, message: String },

    /// A message could not be encoded
    #[error("encode error for {what}: {message}")]
    Encode { what: &'static str, message: String },

    /// Encoded message exceeds the datagram bound
    #[error("{what} of {size} bytes exceeds the {max} byte datagram bound")]
    Oversized {
        what: &'static str,
        size: usize,
        max: usize,
    },

    /// Timestamp outside the representable range
    #[error("invalid timestamp: seconds={seconds}, nanos={nanos}")]
    InvalidTimestamp { seconds: i64, nanos: i32 },

    // ===== RTP Errors =====
    /// RTP packet parse error
    #[error("rtp parse error: {message}")]
    RtpParse { message: String },

    // ===== Sink Errors =====
    /// Sink write error
    #[error("sink '{sink_name}' write error: {message}")]
    SinkWrite { sink_name: String, message: String },

    /// Sink endpoint is gone
    #[error("sink '{sink_name}' closed")]
    SinkClosed { sink_name: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn decode(what: &'static str, message: impl Into<String>) -> Self {
        Self::Decode {
            what,
            message: message.into(),
        }
    }

    pub fn rtp_parse(message: impl Into<String>) -> Self {
        Self::RtpParse {
            message: message.into(),
        }
    }

    /// Create sink write error
    pub fn sink_write(sink_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SinkWrite {
            sink_name: sink_name.into(),
            message: message.into(),
        }
    }

    /// True for the recoverable "one malformed unit" class of errors.
    pub fn is_decode(&self) -> bool {
        matches!(
            self,
            Self::Decode { .. } | Self::RtpParse { .. } | Self::InvalidTimestamp { .. }
        )
    }
}
