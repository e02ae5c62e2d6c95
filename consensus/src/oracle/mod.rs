//! Oracle interface
//!
//! An oracle is an external scoring provider. The engine only needs a stable
//! identity, a provider type and one async scoring call that either returns
//! a score vector or a typed failure. Concrete provider transports live
//! outside this crate; [`StubOracle`] stands in when none is configured.

pub mod stub;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::state::{ProviderIdentity, RequestId, ScoreVector};
use crate::thresholds::AdaptationContext;

pub use stub::{oracles_from_config, OracleSpec, StubOracle};

/// Failure of a single oracle call
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OracleError {
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Provider unavailable: {0}")]
    Unavailable(String),
}

impl OracleError {
    /// Short failure class for logs and diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::Transport(_) => "transport",
            Self::Malformed(_) => "malformed",
            Self::Unavailable(_) => "unavailable",
        }
    }
}

/// Result type for oracle calls
pub type OracleResult<T> = Result<T, OracleError>;

/// Input evaluated by every oracle of an ensemble
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRequest {
    pub id: RequestId,
    /// Operation being validated, e.g. a tool name
    pub operation: String,
    pub payload: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Explicit adaptation context; estimated from the request when absent
    #[serde(default)]
    pub context: Option<AdaptationContext>,
}

impl ValidationRequest {
    pub fn new(operation: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            operation: operation.into(),
            payload: payload.into(),
            metadata: BTreeMap::new(),
            context: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn with_context(mut self, context: AdaptationContext) -> Self {
        self.context = Some(context);
        self
    }
}

/// What an oracle returns on success
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleResponse {
    pub scores: ScoreVector,
    pub confidence: f64,
    pub rationale: String,
    pub token_cost: u64,
    /// Produced without a real provider behind it
    pub demo: bool,
}

/// A scoring provider
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Stable provider id, unique within a provider type
    fn id(&self) -> &str;

    /// Provider family, e.g. "claude", "gemini", "gpt", "local"
    fn provider_type(&self) -> &str;

    /// Score a request, giving up after `timeout`
    async fn score(&self, request: &ValidationRequest, timeout: Duration) -> OracleResult<OracleResponse>;

    fn identity(&self) -> ProviderIdentity {
        ProviderIdentity::new(self.id(), self.provider_type())
    }
}

/// Shared reference to an oracle
pub type SharedOracle = Arc<dyn Oracle>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(OracleError::Timeout(Duration::from_secs(1)).kind(), "timeout");
        assert_eq!(OracleError::Malformed("x".into()).kind(), "malformed");
    }

    #[test]
    fn test_request_builder() {
        let request = ValidationRequest::new("Write", "fn main() {}")
            .with_id("req-1")
            .with_metadata("project_criticality", "0.9");
        assert_eq!(request.id, "req-1");
        assert_eq!(request.metadata["project_criticality"], "0.9");
        assert!(request.context.is_none());
    }
}
