//! EventPublisher trait - outbound side of the bus
//!
//! Sessions publish events decoded from their data channels through this seam.

use crate::Event;

#[trait_variant::make(EventPublisher: Send)]
pub trait LocalEventPublisher {
    /// Replicate an event to every live peer. Fire-and-forget: send failures
    /// are logged by the implementation.
    async fn publish(&self, event: Event);
}
