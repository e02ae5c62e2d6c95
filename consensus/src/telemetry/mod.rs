//! Telemetry and pattern detection over consensus events
//!
//! Every decision is summarised into a [`ConsensusSummary`](crate::state::ConsensusSummary)
//! and fed to the [`TelemetryCollector`], which runs the [`rules`], merges
//! recurring patterns, keeps one-off discoveries and buffers events into
//! batches for the store.

pub mod collector;
pub mod rules;

pub use collector::{
    Detection, ProcessedDiscovery, RecordedEvent, TelemetryCollector, TelemetryConfig,
    TelemetryDashboard, TelemetryHealth, ValidationMetrics,
};
pub use rules::Finding;
