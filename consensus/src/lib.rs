//! Ensemble Consensus Library
//!
//! Scores an operation by fanning it out to several independent oracles,
//! fuses their answers into one consensus decision and learns the decision
//! thresholds from ground-truth feedback.
//!
//! # Modules
//!
//! - [`ensemble`]: oracle fan-out, outlier detection, diversity and the five
//!   consensus methods
//! - [`thresholds`]: context-adjusted thresholds, F1/ROC optimisation and
//!   performance reports
//! - [`telemetry`]: pattern and discovery detection over decisions
//! - [`state`]: shared types and the history store (JSON files, memory, or
//!   RocksDB with `heavy-state`)
//! - [`events`]: broadcast bus for decision, learning and telemetry events
//! - [`service`]: the [`ValidationService`] that ties everything together
//!
//! # Usage
//!
//! ```bash
//! # Validate an operation against the configured ensemble
//! ensemble-consensus validate --operation Bash --payload "cargo test"
//!
//! # Report whether the decision turned out well
//! ensemble-consensus feedback --request-id <id> --success
//!
//! # Inspect learned thresholds and their performance
//! CONSENSUS_STORE_PATH=./state ensemble-consensus report
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod config;
pub mod ensemble;
pub mod events;
pub mod oracle;
pub mod service;
pub mod state;
pub mod telemetry;
pub mod thresholds;

pub use config::{ConfigError, EngineConfig};
pub use ensemble::{ConsensusConfig, ConsensusEngine, EnsembleConfig, EnsembleReport};
pub use oracle::{Oracle, OracleError, OracleResponse, SharedOracle, StubOracle, ValidationRequest};
pub use service::{Decision, DegradationLevel, ServiceError, ServiceResult, ValidationService};
pub use state::{ConsensusMethod, ConsensusResult, ValidationOutcome, ValidationStatus};
pub use thresholds::{AdaptationContext, LearningCycle};
