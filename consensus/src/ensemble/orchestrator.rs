//! Ensemble orchestrator
//!
//! Fans a validation request out to the configured oracles under one shared
//! deadline and turns the responses into a [`Population`]. Calls run on
//! spawned tasks; when the deadline fires the collector stops waiting and
//! drops the remaining handles, which detaches the tasks without aborting
//! them. Anything they return afterwards is discarded.

use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::oracle::{OracleError, OracleResponse, SharedOracle, ValidationRequest};
use crate::state::{DimensionWeights, Population, PopulationMember, ProviderIdentity};

/// Fan-out configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleConfig {
    /// Shared deadline for the whole ensemble call
    pub deadline_ms: u64,
    /// Per-oracle timeout, capped at the deadline
    pub per_call_timeout_ms: u64,
    /// Maximum number of oracles dispatched per request
    pub max_fanout: usize,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            deadline_ms: 10_000,
            per_call_timeout_ms: 8_000,
            max_fanout: 5,
        }
    }
}

impl EnsembleConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }

    /// Effective per-call timeout, never above the deadline
    pub fn per_call_timeout(&self) -> Duration {
        Duration::from_millis(self.per_call_timeout_ms.min(self.deadline_ms))
    }
}

/// Why an oracle did not contribute a member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    Transport,
    Malformed,
    Unavailable,
    /// Still running when the shared deadline fired
    DeadlineExceeded,
    /// Task ended without reporting (panicked)
    Aborted,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Transport => "transport",
            Self::Malformed => "malformed",
            Self::Unavailable => "unavailable",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::Aborted => "aborted",
        }
    }

    fn from_error(error: &OracleError) -> Self {
        match error {
            OracleError::Timeout(_) => Self::Timeout,
            OracleError::Transport(_) => Self::Transport,
            OracleError::Malformed(_) => Self::Malformed,
            OracleError::Unavailable(_) => Self::Unavailable,
        }
    }
}

/// Diagnostic record of one failed oracle call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleFailure {
    pub provider: ProviderIdentity,
    pub kind: FailureKind,
    pub message: String,
    pub latency_ms: u64,
}

/// Everything one ensemble call produced
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnsembleReport {
    /// Successful members, in configured oracle order
    pub population: Population,
    pub failures: Vec<OracleFailure>,
    /// Oracles not dispatched because of the fan-out bound
    pub skipped: Vec<ProviderIdentity>,
    pub elapsed_ms: u64,
}

impl EnsembleReport {
    /// No oracle succeeded; the caller must take the fallback path
    pub fn is_empty(&self) -> bool {
        self.population.is_empty()
    }

    pub fn dispatched(&self) -> usize {
        self.population.len() + self.failures.len()
    }

    pub fn total_tokens(&self) -> u64 {
        self.population.iter().map(|m| m.token_cost).sum()
    }

    /// Failures caused by the shared deadline
    pub fn timed_out(&self) -> impl Iterator<Item = &OracleFailure> {
        self.failures
            .iter()
            .filter(|f| matches!(f.kind, FailureKind::Timeout | FailureKind::DeadlineExceeded))
    }
}

/// Check a response and reduce it to a weighted score
pub fn validate_response(response: &OracleResponse, weights: &DimensionWeights) -> Result<f64, OracleError> {
    if !response.confidence.is_finite() || !(0.0..=1.0).contains(&response.confidence) {
        return Err(OracleError::Malformed(format!(
            "confidence {} outside [0, 1]",
            response.confidence
        )));
    }
    if let Some((dimension, score)) = response
        .scores
        .iter()
        .find(|(_, s)| !s.is_finite() || !(0.0..=100.0).contains(s))
    {
        return Err(OracleError::Malformed(format!(
            "{dimension} score {score} outside [0, 100]"
        )));
    }
    weights
        .weighted_score(&response.scores)
        .ok_or_else(|| OracleError::Malformed("no weighted dimension present".to_string()))
}

struct CallOutcome {
    index: usize,
    result: Result<OracleResponse, OracleError>,
    latency: Duration,
}

/// Fan a request out to the oracles and collect a population
pub async fn run_ensemble(
    request: &ValidationRequest,
    oracles: &[SharedOracle],
    weights: &DimensionWeights,
    config: &EnsembleConfig,
) -> EnsembleReport {
    let started = Instant::now();
    let deadline = tokio::time::Instant::now() + config.deadline();
    let per_call = config.per_call_timeout();

    let fanout = oracles.len().min(config.max_fanout);
    let (dispatched, rest) = oracles.split_at(fanout);
    let skipped: Vec<ProviderIdentity> = rest.iter().map(|o| o.identity()).collect();
    if !skipped.is_empty() {
        warn!(
            request_id = %request.id,
            skipped = skipped.len(),
            max_fanout = config.max_fanout,
            "Fan-out bound reached, extra oracles skipped"
        );
    }

    info!(
        request_id = %request.id,
        oracles = dispatched.len(),
        deadline_ms = config.deadline_ms,
        "Dispatching ensemble"
    );

    let mut calls: FuturesUnordered<_> = dispatched
        .iter()
        .enumerate()
        .map(|(index, oracle)| {
            let oracle = SharedOracle::clone(oracle);
            let request = request.clone();
            tokio::spawn(async move {
                let call_started = Instant::now();
                let result = match tokio::time::timeout(per_call, oracle.score(&request, per_call)).await {
                    Ok(result) => result,
                    Err(_) => Err(OracleError::Timeout(per_call)),
                };
                CallOutcome {
                    index,
                    result,
                    latency: call_started.elapsed(),
                }
            })
        })
        .collect();

    let mut slots: Vec<Option<CallOutcome>> = (0..fanout).map(|_| None).collect();
    loop {
        match tokio::time::timeout_at(deadline, calls.next()).await {
            Ok(Some(Ok(outcome))) => {
                let index = outcome.index;
                slots[index] = Some(outcome);
            }
            Ok(Some(Err(e))) => {
                warn!(request_id = %request.id, error = %e, "Oracle task ended abnormally");
            }
            Ok(None) => break,
            Err(_) => {
                warn!(
                    request_id = %request.id,
                    pending = calls.len(),
                    "Ensemble deadline elapsed, abandoning pending oracle calls"
                );
                break;
            }
        }
    }
    // Dropping the handles detaches the remaining tasks
    drop(calls);

    let elapsed = started.elapsed();
    let mut population = Population::default();
    let mut failures = Vec::new();

    for (oracle, slot) in dispatched.iter().zip(slots) {
        let provider = oracle.identity();
        let outcome = match slot {
            Some(outcome) => outcome,
            None => {
                // Distinguish a deadline hit from a task that died early
                let kind = if elapsed >= config.deadline() {
                    FailureKind::DeadlineExceeded
                } else {
                    FailureKind::Aborted
                };
                warn!(request_id = %request.id, provider = %provider, kind = ?kind, "Oracle produced no result");
                failures.push(OracleFailure {
                    provider,
                    kind,
                    message: "no result before the ensemble deadline".to_string(),
                    latency_ms: elapsed.as_millis() as u64,
                });
                continue;
            }
        };

        let latency_ms = outcome.latency.as_millis() as u64;
        let checked = outcome
            .result
            .and_then(|response| validate_response(&response, weights).map(|score| (response, score)));

        match checked {
            Ok((response, weighted_score)) => {
                debug!(request_id = %request.id, provider = %provider, score = weighted_score, "Oracle responded");
                let mut member = PopulationMember::new(provider, weighted_score, response.scores, response.confidence)
                    .with_rationale(response.rationale)
                    .with_latency_ms(latency_ms)
                    .with_token_cost(response.token_cost);
                member.demo = response.demo;
                population.push(member);
            }
            Err(error) => {
                warn!(
                    request_id = %request.id,
                    provider = %provider,
                    kind = error.kind(),
                    error = %error,
                    "Oracle call failed"
                );
                failures.push(OracleFailure {
                    provider,
                    kind: FailureKind::from_error(&error),
                    message: error.to_string(),
                    latency_ms,
                });
            }
        }
    }

    info!(
        request_id = %request.id,
        succeeded = population.len(),
        failed = failures.len(),
        elapsed_ms = elapsed.as_millis() as u64,
        "Ensemble collected"
    );

    EnsembleReport {
        population,
        failures,
        skipped,
        elapsed_ms: elapsed.as_millis() as u64,
    }
}
