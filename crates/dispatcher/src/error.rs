//! Dispatcher error types

use contracts::{SessionId, StreamKind};
use thiserror::Error;

/// Dispatcher-specific errors
#[derive(Debug, Error)]
pub enum DispatcherError {
    /// A sink is already registered under this session id
    #[error("{kind} sink already registered for session '{session_id}'")]
    AlreadyRegistered {
        kind: StreamKind,
        session_id: SessionId,
    },

    /// Sink write error (from contract)
    #[error("sink error: {0}")]
    Contract(#[from] contracts::ContractError),
}
