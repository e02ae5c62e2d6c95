//! Consensus event notifications
//!
//! The validation service publishes a [`ConsensusEvent`] at every decision
//! point: dispatch, oracle failure, consensus or fallback, feedback,
//! threshold cycles and telemetry detections. Subscribers receive them
//! through a tokio broadcast channel, optionally filtered by request id or
//! event type.
//!
//! ```ignore
//! let mut receiver = service.events().subscribe_filtered(
//!     EventFilter::new().types(vec!["thresholds_updated"]),
//! );
//! let event = receiver.recv().await?;
//! ```

pub mod bus;
pub mod types;

pub use bus::{EventBus, EventBusExt, EventFilter, FilteredReceiver, SharedEventBus};
pub use types::ConsensusEvent;
