//! Ensemble fan-out and population consensus
//!
//! - [`orchestrator`]: runs one request against every configured oracle under a
//!   shared deadline and builds a [`Population`](crate::state::Population)
//! - [`engine`]: stateful consensus cycle (reliability, expertise, history)
//! - [`methods`]: the pure aggregation functions behind [`ConsensusMethod`](crate::state::ConsensusMethod)
//! - [`outliers`], [`diversity`], [`stats`]: statistics shared by the above

pub mod diversity;
pub mod engine;
pub mod methods;
pub mod orchestrator;
pub mod outliers;
pub mod stats;

pub use engine::{ConsensusConfig, ConsensusEngine, PopulationHealthReport};
pub use methods::aggregate;
pub use orchestrator::{run_ensemble, EnsembleConfig, EnsembleReport, FailureKind, OracleFailure};
pub use outliers::{detect_outliers, OutlierSet};
