//! Stub oracle used when no real provider is configured
//!
//! Returns a fixed score profile with a small deterministic per-request
//! jitter, so repeated runs over the same request id are reproducible.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Oracle, OracleError, OracleResponse, OracleResult, SharedOracle, ValidationRequest};
use crate::ensemble::stats::fnv1a;
use crate::state::{dimensions, ScoreVector};

/// Configuration of one stub oracle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleSpec {
    pub id: String,
    pub provider_type: String,
    /// Base score per dimension
    pub scores: BTreeMap<String, f64>,
    pub confidence: f64,
    /// Maximum absolute jitter applied to each dimension
    pub jitter: f64,
    pub latency_ms: u64,
    pub token_cost: u64,
    /// Fail every call with this message
    pub fail: Option<String>,
}

impl Default for OracleSpec {
    fn default() -> Self {
        Self {
            id: "stub".to_string(),
            provider_type: "stub".to_string(),
            scores: default_profile(),
            confidence: 0.7,
            jitter: 5.0,
            latency_ms: 0,
            token_cost: 150,
            fail: None,
        }
    }
}

impl OracleSpec {
    pub fn new(id: &str, provider_type: &str) -> Self {
        Self {
            id: id.to_string(),
            provider_type: provider_type.to_string(),
            ..Self::default()
        }
    }
}

fn default_profile() -> BTreeMap<String, f64> {
    [
        (dimensions::PERFORMANCE, 75.0),
        (dimensions::NOVELTY, 65.0),
        (dimensions::EFFICIENCY, 80.0),
        (dimensions::SAFETY, 85.0),
    ]
    .iter()
    .map(|(d, s)| (d.to_string(), *s))
    .collect()
}

/// Deterministic stand-in for a scoring provider
#[derive(Debug, Clone)]
pub struct StubOracle {
    id: String,
    provider_type: String,
    base: ScoreVector,
    confidence: f64,
    jitter: f64,
    latency: Duration,
    token_cost: u64,
    fail: Option<String>,
}

impl StubOracle {
    pub fn new(id: &str, provider_type: &str) -> Self {
        Self::from_spec(&OracleSpec::new(id, provider_type))
    }

    pub fn from_spec(spec: &OracleSpec) -> Self {
        Self {
            id: spec.id.clone(),
            provider_type: spec.provider_type.clone(),
            base: spec.scores.iter().map(|(d, s)| (d.clone(), *s)).collect(),
            confidence: spec.confidence,
            jitter: spec.jitter.max(0.0),
            latency: Duration::from_millis(spec.latency_ms),
            token_cost: spec.token_cost,
            fail: spec.fail.clone(),
        }
    }

    pub fn with_scores(mut self, scores: ScoreVector) -> Self {
        self.base = scores;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.max(0.0);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn failing(mut self, message: &str) -> Self {
        self.fail = Some(message.to_string());
        self
    }

    pub fn shared(self) -> SharedOracle {
        Arc::new(self)
    }

    /// Offset in [-jitter, jitter] for one dimension of one request
    fn jitter_for(&self, request_id: &str, dimension: &str) -> f64 {
        if self.jitter == 0.0 {
            return 0.0;
        }
        let seed = format!("{}|{}|{}", request_id, self.id, dimension);
        let unit = (fnv1a(seed.as_bytes()) % 10_000) as f64 / 9_999.0;
        (unit * 2.0 - 1.0) * self.jitter
    }
}

#[async_trait]
impl Oracle for StubOracle {
    fn id(&self) -> &str {
        &self.id
    }

    fn provider_type(&self) -> &str {
        &self.provider_type
    }

    async fn score(&self, request: &ValidationRequest, timeout: Duration) -> OracleResult<OracleResponse> {
        if self.latency > timeout {
            tokio::time::sleep(timeout).await;
            return Err(OracleError::Timeout(timeout));
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if let Some(message) = &self.fail {
            return Err(OracleError::Unavailable(message.clone()));
        }

        let scores: ScoreVector = self
            .base
            .iter()
            .map(|(d, s)| {
                let value = (s + self.jitter_for(&request.id, d)).clamp(0.0, 100.0);
                (d.to_string(), value)
            })
            .collect();

        debug!(oracle = %self.id, request_id = %request.id, "Stub oracle scored request");

        Ok(OracleResponse {
            scores,
            confidence: self.confidence,
            rationale: format!("Stub assessment of {} by {}", request.operation, self.id),
            token_cost: self.token_cost,
            demo: true,
        })
    }
}

/// Build the configured oracle set
pub fn oracles_from_config(specs: &[OracleSpec]) -> Vec<SharedOracle> {
    specs
        .iter()
        .map(|spec| StubOracle::from_spec(spec).shared())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stub_is_deterministic_per_request() {
        let oracle = StubOracle::new("s1", "stub");
        let request = ValidationRequest::new("Write", "x").with_id("req-7");
        let a = oracle.score(&request, Duration::from_secs(1)).await.unwrap();
        let b = oracle.score(&request, Duration::from_secs(1)).await.unwrap();
        assert_eq!(a.scores, b.scores);
        assert!(a.demo);
        assert_eq!(a.confidence, 0.7);
    }

    #[tokio::test]
    async fn test_stub_jitter_bounded() {
        let oracle = StubOracle::new("s1", "stub").with_jitter(5.0);
        for i in 0..20 {
            let request = ValidationRequest::new("Read", "").with_id(format!("req-{i}"));
            let response = oracle.score(&request, Duration::from_secs(1)).await.unwrap();
            let performance = response.scores.get(dimensions::PERFORMANCE).unwrap();
            assert!((70.0..=80.0).contains(&performance));
        }
    }

    #[tokio::test]
    async fn test_stub_without_jitter_returns_base() {
        let oracle = StubOracle::new("s1", "stub")
            .with_jitter(0.0)
            .with_scores(ScoreVector::uniform(85.0));
        let request = ValidationRequest::new("Read", "");
        let response = oracle.score(&request, Duration::from_secs(1)).await.unwrap();
        assert_eq!(response.scores, ScoreVector::uniform(85.0));
    }

    #[tokio::test]
    async fn test_stub_failure_and_timeout() {
        let request = ValidationRequest::new("Bash", "ls");
        let failing = StubOracle::new("f", "stub").failing("no api key");
        assert!(matches!(
            failing.score(&request, Duration::from_secs(1)).await,
            Err(OracleError::Unavailable(_))
        ));

        let slow = StubOracle::new("slow", "stub").with_latency(Duration::from_millis(200));
        assert!(matches!(
            slow.score(&request, Duration::from_millis(10)).await,
            Err(OracleError::Timeout(_))
        ));
    }

    #[test]
    fn test_oracles_from_config_preserves_order() {
        let specs = vec![OracleSpec::new("a", "claude"), OracleSpec::new("b", "gemini")];
        let oracles = oracles_from_config(&specs);
        let ids: Vec<&str> = oracles.iter().map(|o| o.id()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(oracles[1].identity().key(), "gemini:b");
    }
}
