//! Sink implementations
//!
//! Contains LogSink. Session-bound sinks live with the peer session.

mod log;

pub use self::log::LogSink;
