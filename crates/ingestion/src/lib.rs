//! # Ingestion Pipeline
//!
//! Stream source module.
//!
//! Responsibilities:
//! - Read the RTP ingest socket (unicast or multicast) into `RtpPacket`s
//! - Carry bus events towards the dispatcher
//! - Backpressure management and drop policy
//! - Send to downstream via async-channel
//!
//! ## Usage Example
//!
//! ```ignore
//! use ingestion::{BackpressureConfig, IngestionPipeline, RtpSource};
//!
//! let mut pipeline = IngestionPipeline::new(BackpressureConfig::default());
//! let source = RtpSource::bind(&blueprint.rtp)?;
//! pipeline.spawn_rtp(source, shutdown_rx);
//!
//! let bus = EventBus::bind(blueprint.bus, Some(pipeline.event_sender()))?;
//! let rtp_rx = pipeline.take_rtp_receiver().unwrap();
//! while let Ok(packet) = rtp_rx.recv().await {
//!     // Process data packet
//! }
//! ```

mod backpressure;
mod config;
mod error;
mod pipeline;
mod rtp;

// Re-exports
pub use backpressure::{offer, Offer};
pub use config::{BackpressureConfig, DropPolicy, IngestionMetrics, MetricsSnapshot};
pub use error::{IngestionError, Result};
pub use pipeline::IngestionPipeline;
pub use rtp::RtpSource;
