//! Session error types

use thiserror::Error;

/// Session-specific errors
#[derive(Debug, Error)]
pub enum SessionError {
    /// The offer advertises no codec with the required name
    #[error("remote peer does not support {codec}")]
    CapabilityMismatch { codec: String },

    /// The offered description is unusable
    #[error("invalid session description: {message}")]
    InvalidDescription { message: String },

    /// The transport collaborator failed to negotiate
    #[error("negotiation failed: {message}")]
    Negotiation { message: String },

    /// Sink registration error
    #[error(transparent)]
    Dispatcher(#[from] dispatcher::DispatcherError),

    /// Contract error
    #[error(transparent)]
    Contract(#[from] contracts::ContractError),
}

impl SessionError {
    pub fn negotiation(message: impl Into<String>) -> Self {
        Self::Negotiation {
            message: message.into(),
        }
    }

    /// True when the caller sent a request that can never succeed as is.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::CapabilityMismatch { .. } | Self::InvalidDescription { .. }
        )
    }
}
