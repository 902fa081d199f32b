//! DataSink trait - Dispatcher output interface
//!
//! Defines the abstract interface for Sinks and the stream kinds they consume.

use std::fmt;

use crate::ContractError;

/// Data output trait
///
/// All sink implementations must implement this trait. `T` is the stream
/// item type (RTP packet or bus event).
#[trait_variant::make(DataSink: Send)]
pub trait LocalDataSink<T> {
    /// Sink name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Write one item
    ///
    /// # Errors
    /// Returns write error (should include context). A
    /// [`ContractError::SinkClosed`] tells the worker the endpoint is gone.
    async fn write(&mut self, item: T) -> Result<(), ContractError>;

    /// Flush buffer (if any)
    async fn flush(&mut self) -> Result<(), ContractError>;

    /// Close sink
    async fn close(&mut self) -> Result<(), ContractError>;
}

/// The two streams fanned out to sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Rtp,
    Event,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Rtp => "rtp",
            StreamKind::Event => "event",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
