//! # Contracts
//!
//! Frozen interface contracts, defining inter-module data structures and traits.
//! All business crates depend on this crate; reverse dependencies are prohibited.
//!
//! ## Time Model
//! - Bus messages carry wall-clock [`Timestamp`]s (seconds + nanos since the Unix epoch)
//! - Staleness is always judged against the local clock at check time

mod blueprint;
mod bus;
mod error;
mod publisher;
mod rtp;
mod session_id;
mod sink;
mod wire;

pub use blueprint::*;
pub use bus::*;
pub use error::*;
pub use publisher::{EventPublisher, LocalEventPublisher};
pub use rtp::*;
pub use session_id::SessionId;
pub use sink::*;
pub use wire::*;
