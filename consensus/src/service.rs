//! Validation service
//!
//! Runs the full decision loop for one request: ensemble fan-out, consensus
//! (or fallback), context-adjusted thresholds, status, telemetry and a
//! pending record awaiting feedback. Feedback later closes the loop through
//! the threshold learner.
//!
//! All learned state sits behind one async mutex so concurrent requests
//! serialise their read-modify-write cycles. Oracle I/O happens before the
//! lock is taken. Persistence failures are logged and never surface to the
//! caller; in-memory state stays authoritative until the next successful
//! write.
//!
//! Each mutation copies only the collections it changed into a [`Snapshot`]
//! while the lock is held. The copy is written on the blocking pool after
//! the lock is released, and a per-collection sequence number keeps a late
//! snapshot from overwriting a newer one.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, EngineConfig};
use crate::ensemble::{
    run_ensemble, ConsensusEngine, EnsembleReport, OracleFailure, PopulationHealthReport,
};
use crate::events::{ConsensusEvent, EventBus, SharedEventBus};
use crate::oracle::{oracles_from_config, SharedOracle, ValidationRequest};
use crate::state::{
    schema::{self, caps},
    ConsensusMethod, ConsensusSummary, DecisionThresholds, HistoryStore, PendingDecision,
    Population, PopulationHistoryEntry, ProviderIdentity, ProviderKey, ProviderRecord, RequestId,
    ScoreVector, SharedHistoryStore, StoreError, StoreResult, TelemetryBatch, ThresholdConfig,
    ValidationDiscovery, ValidationOutcome, ValidationPattern, ValidationStatus,
};
use crate::telemetry::{Detection, ProcessedDiscovery, TelemetryCollector, TelemetryDashboard};
use crate::thresholds::{estimate_context, AdaptationContext, LearningCycle, PerformanceReport, ThresholdLearner};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Unknown request: {0}")]
    UnknownRequest(RequestId),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// How much of the ensemble stood behind a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationLevel {
    /// Every dispatched oracle contributed
    Full,
    /// Some oracles failed or were skipped, or the population was small
    Partial,
    /// No oracle contributed; fallback result
    Unavailable,
}

impl fmt::Display for DegradationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Partial => write!(f, "partial"),
            Self::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// Decision payload returned to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub request_id: RequestId,
    pub consensus_score: f64,
    pub status: ValidationStatus,
    pub confidence: f64,
    /// `score ± uncertainty`, clamped to [0, 100]
    pub confidence_interval: (f64, f64),
    pub outliers: Vec<ProviderKey>,
    pub reasoning: String,
    pub contributions: BTreeMap<ProviderKey, f64>,
    pub method: ConsensusMethod,
    pub thresholds: DecisionThresholds,
    pub degradation: DegradationLevel,
    pub population_size: usize,
    pub failed_oracles: Vec<OracleFailure>,
    pub skipped_oracles: Vec<ProviderIdentity>,
    pub total_tokens: u64,
    pub elapsed_ms: u64,
    pub decided_at: DateTime<Utc>,
}

impl Decision {
    pub fn is_fallback(&self) -> bool {
        self.degradation == DegradationLevel::Unavailable
    }
}

/// Single-writer learned state
struct EngineState {
    engine: ConsensusEngine,
    learner: ThresholdLearner,
    telemetry: TelemetryCollector,
    pending: Vec<PendingDecision>,
    /// Sequence number of the latest snapshot
    seq: u64,
}

impl EngineState {
    /// Start the snapshot for the mutation about to happen
    fn snapshot(&mut self) -> Snapshot {
        self.seq += 1;
        Snapshot {
            seq: self.seq,
            ..Default::default()
        }
    }
}

/// Copies of the collections one mutation changed
#[derive(Debug, Default)]
struct Snapshot {
    seq: u64,
    providers: Option<BTreeMap<ProviderKey, ProviderRecord>>,
    population_history: Option<Vec<PopulationHistoryEntry>>,
    outcomes: Option<Vec<ValidationOutcome>>,
    thresholds: Option<ThresholdConfig>,
    pending: Option<Vec<PendingDecision>>,
    telemetry_events: Option<Vec<ConsensusSummary>>,
    patterns: Option<BTreeMap<String, ValidationPattern>>,
    discoveries: Option<Vec<ValidationDiscovery>>,
    batch: Option<TelemetryBatch>,
}

impl Snapshot {
    fn is_empty(&self) -> bool {
        self.providers.is_none()
            && self.population_history.is_none()
            && self.outcomes.is_none()
            && self.thresholds.is_none()
            && self.pending.is_none()
            && self.telemetry_events.is_none()
            && self.patterns.is_none()
            && self.discoveries.is_none()
            && self.batch.is_none()
    }

    /// Names of the collections this snapshot carries
    fn collections(&self) -> Vec<&'static str> {
        [
            (self.providers.is_some(), schema::COL_PROVIDERS),
            (self.population_history.is_some(), schema::COL_POPULATION_HISTORY),
            (self.outcomes.is_some(), schema::COL_OUTCOMES),
            (self.thresholds.is_some(), schema::COL_THRESHOLDS),
            (self.pending.is_some(), schema::COL_PENDING),
            (self.telemetry_events.is_some(), schema::COL_TELEMETRY_EVENTS),
            (self.patterns.is_some(), schema::COL_PATTERNS),
            (self.discoveries.is_some(), schema::COL_DISCOVERIES),
            (self.batch.is_some(), schema::COL_BATCHES),
        ]
        .into_iter()
        .filter_map(|(present, name)| present.then_some(name))
        .collect()
    }

    /// Write every carried collection not already superseded on disk
    fn write(self, store: &HistoryStore, written: &mut BTreeMap<&'static str, u64>) {
        let seq = self.seq;
        save_fresh(written, seq, schema::COL_PROVIDERS, self.providers, |v| store.save_providers(&v));
        save_fresh(written, seq, schema::COL_POPULATION_HISTORY, self.population_history, |v| {
            store.save_population_history(&v)
        });
        save_fresh(written, seq, schema::COL_OUTCOMES, self.outcomes, |v| store.save_outcomes(&v));
        save_fresh(written, seq, schema::COL_THRESHOLDS, self.thresholds, |v| store.save_thresholds(&v));
        save_fresh(written, seq, schema::COL_PENDING, self.pending, |v| store.save_pending(&v));
        save_fresh(written, seq, schema::COL_TELEMETRY_EVENTS, self.telemetry_events, |v| {
            store.save_telemetry_events(&v)
        });
        save_fresh(written, seq, schema::COL_PATTERNS, self.patterns, |v| store.save_patterns(&v));
        save_fresh(written, seq, schema::COL_DISCOVERIES, self.discoveries, |v| store.save_discoveries(&v));
        if let Some(batch) = self.batch {
            persist(schema::COL_BATCHES, store.append_batch(&batch));
        }
    }
}

fn save_fresh<T>(
    written: &mut BTreeMap<&'static str, u64>,
    seq: u64,
    collection: &'static str,
    value: Option<T>,
    save: impl FnOnce(T) -> StoreResult<()>,
) {
    let Some(value) = value else {
        return;
    };
    let last = written.entry(collection).or_default();
    if *last > seq {
        debug!(collection, seq, last = *last, "Skipping superseded snapshot");
        return;
    }
    *last = seq;
    persist(collection, save(value));
}

fn loaded<T: Default>(collection: &str, result: StoreResult<T>) -> T {
    result.unwrap_or_else(|e| {
        error!(collection, error = %e, "Failed to load collection, starting empty");
        T::default()
    })
}

/// Mean score per dimension across the population
fn mean_scores(population: &Population) -> ScoreVector {
    let mut sums: BTreeMap<&str, (f64, usize)> = BTreeMap::new();
    for member in population.iter() {
        for (dimension, score) in member.scores.iter() {
            let entry = sums.entry(dimension).or_insert((0.0, 0));
            entry.0 += score;
            entry.1 += 1;
        }
    }
    sums.into_iter()
        .fold(ScoreVector::new(), |acc, (dimension, (sum, n))| acc.with(dimension, sum / n as f64))
}

fn persist(collection: &str, result: StoreResult<()>) {
    if let Err(e) = result {
        warn!(collection, error = %e, "Failed to persist collection");
    }
}

pub struct ValidationService {
    config: EngineConfig,
    oracles: Vec<SharedOracle>,
    store: SharedHistoryStore,
    events: SharedEventBus,
    state: Mutex<EngineState>,
    /// Last snapshot sequence written per collection
    written: Arc<StdMutex<BTreeMap<&'static str, u64>>>,
}

impl ValidationService {
    /// Build a service over explicit oracles, restoring persisted state
    pub fn new(mut config: EngineConfig, oracles: Vec<SharedOracle>, store: SharedHistoryStore) -> ServiceResult<Self> {
        if oracles.is_empty() {
            return Err(ConfigError::NoOracles.into());
        }
        config.validate_settings()?;

        let providers = loaded("providers", store.load_providers());
        let history = loaded("population_history", store.load_population_history());
        let base = loaded("thresholds", store.load_thresholds()).unwrap_or_default();
        let outcomes = loaded("outcomes", store.load_outcomes());
        let pending = loaded("pending", store.load_pending());
        let events = loaded("telemetry_events", store.load_telemetry_events());
        let patterns = loaded("patterns", store.load_patterns());
        let discoveries = loaded("discoveries", store.load_discoveries());

        info!(
            backend = store.backend_name(),
            oracles = oracles.len(),
            providers = providers.len(),
            outcomes = outcomes.len(),
            pending = pending.len(),
            approved_threshold = base.approved_threshold,
            "Validation service initialised"
        );

        let state = EngineState {
            engine: ConsensusEngine::with_state(config.consensus.clone(), providers, history),
            learner: ThresholdLearner::new(config.learner.clone(), base, outcomes),
            telemetry: TelemetryCollector::with_state(config.telemetry.clone(), events, patterns, discoveries),
            pending,
            seq: 0,
        };

        Ok(Self {
            config,
            oracles,
            store,
            events: EventBus::new().shared(),
            state: Mutex::new(state),
            written: Arc::new(StdMutex::new(BTreeMap::new())),
        })
    }

    /// Build oracles and store from configuration
    pub fn from_config(mut config: EngineConfig) -> ServiceResult<Self> {
        config.validate()?;
        let store = HistoryStore::open(&config.store)?.shared();
        let oracles = oracles_from_config(&config.oracles);
        Self::new(config, oracles, store)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn events(&self) -> &SharedEventBus {
        &self.events
    }

    pub fn store(&self) -> &SharedHistoryStore {
        &self.store
    }

    // =========================================================================
    // Decisions
    // =========================================================================

    /// Validate with the configured default method
    pub async fn validate(&self, request: ValidationRequest) -> Decision {
        let method = self.config.consensus.method;
        self.validate_with(request, method).await
    }

    /// Full decision cycle; always returns a well-formed decision
    pub async fn validate_with(&self, request: ValidationRequest, method: ConsensusMethod) -> Decision {
        let started = Instant::now();
        let dispatched = self.oracles.len().min(self.config.ensemble.max_fanout);
        self.events.publish(ConsensusEvent::EnsembleDispatched {
            request_id: request.id.clone(),
            oracles: dispatched,
            skipped: self.oracles.len() - dispatched,
            timestamp: Utc::now(),
        });

        let report = run_ensemble(&request, &self.oracles, &self.config.weights, &self.config.ensemble).await;
        for failure in &report.failures {
            self.events.publish(ConsensusEvent::OracleFailed {
                request_id: request.id.clone(),
                provider: failure.provider.key(),
                kind: failure.kind.as_str().to_string(),
                error: failure.message.clone(),
                timestamp: Utc::now(),
            });
        }

        let mut state = self.state.lock().await;
        let mut snapshot = state.snapshot();
        let context = request.context.clone().unwrap_or_else(|| {
            let past = state.learner.recent_success_rate().unwrap_or(0.5);
            estimate_context(&request, past)
        });
        let thresholds = state.learner.thresholds(&context);

        let EnsembleReport {
            mut population,
            failures,
            skipped,
            elapsed_ms: ensemble_ms,
        } = report;
        let total_tokens: u64 = population.iter().map(|m| m.token_cost).sum();

        let (result, status, degradation) = if population.is_empty() {
            let reason = if failures.is_empty() {
                "no oracle dispatched".to_string()
            } else {
                format!("all {} oracles failed", failures.len())
            };
            warn!(request_id = %request.id, reason = %reason, "Using fallback consensus");
            self.events.publish(ConsensusEvent::FallbackUsed {
                request_id: request.id.clone(),
                reason: reason.clone(),
                timestamp: Utc::now(),
            });
            let result = state.engine.fallback_result(method, &reason);
            (result, ValidationStatus::NeedsRevision, DegradationLevel::Unavailable)
        } else {
            let result = state.engine.consensus(&mut population, method);
            let status = thresholds.status_for(result.consensus_score, result.confidence_level);
            let degradation = if failures.is_empty()
                && skipped.is_empty()
                && population.len() >= self.config.consensus.min_population
            {
                DegradationLevel::Full
            } else {
                DegradationLevel::Partial
            };
            snapshot.providers = Some(state.engine.providers().clone());
            snapshot.population_history = Some(state.engine.history().to_vec());
            (result, status, degradation)
        };

        let providers: Vec<ProviderKey> = population.iter().map(|m| m.key()).collect();

        // Telemetry
        let recorded = state.telemetry.record_event(ConsensusSummary {
            request_id: request.id.clone(),
            recorded_at: Utc::now(),
            consensus_score: result.consensus_score,
            confidence: result.confidence_level,
            diversity_index: result.dynamics.diversity_index,
            population_size: population.len(),
            outliers: result.outliers.clone(),
            providers: providers.clone(),
            method,
            elapsed_secs: ensemble_ms as f64 / 1000.0,
            total_tokens,
            fallback: result.fallback,
        });
        if state.telemetry.is_enabled() {
            snapshot.telemetry_events = Some(state.telemetry.events().to_vec());
        }
        for detection in &recorded.detections {
            match detection {
                Detection::Pattern(_) if snapshot.patterns.is_none() => {
                    snapshot.patterns = Some(state.telemetry.patterns().clone());
                }
                Detection::Discovery(_) if snapshot.discoveries.is_none() => {
                    snapshot.discoveries = Some(state.telemetry.discoveries().to_vec());
                }
                _ => {}
            }
            self.publish_detection(&request.id, detection);
        }
        snapshot.batch = recorded.batch;

        // Pending decision awaiting feedback
        state.pending.push(PendingDecision {
            request_id: request.id.clone(),
            predicted_score: result.consensus_score,
            predicted_status: status,
            confidence: result.confidence_level,
            scores: mean_scores(&population),
            providers: providers.clone(),
            decided_at: Utc::now(),
        });
        let excess = state.pending.len().saturating_sub(caps::PENDING);
        state.pending.drain(..excess);
        snapshot.pending = Some(state.pending.clone());
        drop(state);
        self.write_snapshot(snapshot).await;

        let score = result.consensus_score;
        let uncertainty = result.consensus_uncertainty;
        let decision = Decision {
            request_id: request.id.clone(),
            consensus_score: score,
            status,
            confidence: result.confidence_level,
            confidence_interval: ((score - uncertainty).max(0.0), (score + uncertainty).min(100.0)),
            outliers: result.outliers,
            reasoning: result.reasoning,
            contributions: result.member_contributions,
            method,
            thresholds,
            degradation,
            population_size: population.len(),
            failed_oracles: failures,
            skipped_oracles: skipped,
            total_tokens,
            elapsed_ms: started.elapsed().as_millis() as u64,
            decided_at: Utc::now(),
        };

        info!(
            request_id = %decision.request_id,
            score = decision.consensus_score,
            status = %decision.status,
            confidence = decision.confidence,
            degradation = %decision.degradation,
            "Validation decided"
        );
        self.events.publish(ConsensusEvent::ConsensusReached {
            request_id: decision.request_id.clone(),
            score: decision.consensus_score,
            confidence: decision.confidence,
            status: decision.status,
            method,
            population_size: decision.population_size,
            outliers: decision.outliers.clone(),
            timestamp: decision.decided_at,
        });

        decision
    }

    /// Write a snapshot off the async runtime, outside the state lock
    async fn write_snapshot(&self, snapshot: Snapshot) {
        if snapshot.is_empty() {
            return;
        }
        debug!(seq = snapshot.seq, collections = ?snapshot.collections(), "Persisting snapshot");
        let store = Arc::clone(&self.store);
        let written = Arc::clone(&self.written);
        let result = tokio::task::spawn_blocking(move || {
            let mut written = written.lock().unwrap_or_else(PoisonError::into_inner);
            snapshot.write(&store, &mut written);
        })
        .await;
        if let Err(e) = result {
            error!(error = %e, "Persistence task failed");
        }
    }

    fn publish_detection(&self, request_id: &str, detection: &Detection) {
        let event = match detection {
            Detection::Pattern(pattern) => ConsensusEvent::PatternDetected {
                request_id: request_id.to_string(),
                pattern_type: pattern.pattern_type,
                signature: pattern.signature.clone(),
                occurrences: pattern.occurrences,
                timestamp: pattern.last_updated,
            },
            Detection::Discovery(discovery) => ConsensusEvent::DiscoveryRecorded {
                request_id: request_id.to_string(),
                discovery_type: discovery.discovery_type,
                confidence: discovery.confidence,
                impact: discovery.impact,
                timestamp: discovery.recorded_at,
            },
        };
        self.events.publish(event);
    }

    // =========================================================================
    // Feedback
    // =========================================================================

    /// Close the loop for an earlier decision
    pub async fn record_feedback(&self, request_id: &str, actual_success: bool) -> ServiceResult<LearningCycle> {
        let mut state = self.state.lock().await;
        let position = state
            .pending
            .iter()
            .position(|p| p.request_id == request_id)
            .ok_or_else(|| ServiceError::UnknownRequest(request_id.to_string()))?;
        let pending = state.pending.remove(position);
        let mut snapshot = state.snapshot();
        snapshot.pending = Some(state.pending.clone());

        let cycle = self.apply_outcome(&mut state, &mut snapshot, pending.into_outcome(actual_success));
        drop(state);
        self.write_snapshot(snapshot).await;
        Ok(cycle)
    }

    /// Record an outcome the caller assembled itself
    pub async fn record_outcome(&self, outcome: ValidationOutcome) -> LearningCycle {
        let mut state = self.state.lock().await;
        let mut snapshot = state.snapshot();
        let cycle = self.apply_outcome(&mut state, &mut snapshot, outcome);
        drop(state);
        self.write_snapshot(snapshot).await;
        cycle
    }

    fn apply_outcome(
        &self,
        state: &mut EngineState,
        snapshot: &mut Snapshot,
        outcome: ValidationOutcome,
    ) -> LearningCycle {
        self.events.publish(ConsensusEvent::OutcomeRecorded {
            request_id: outcome.request_id.clone(),
            actual_success: outcome.actual_success,
            predicted_status: outcome.predicted_status,
            timestamp: Utc::now(),
        });

        let cycle = state.learner.record_outcome(outcome);
        snapshot.outcomes = Some(state.learner.history().to_vec());
        match &cycle {
            LearningCycle::Updated { previous, current } => {
                snapshot.thresholds = Some(current.clone());
                self.events.publish(ConsensusEvent::ThresholdsUpdated {
                    previous_approved: previous.approved_threshold,
                    approved: current.approved_threshold,
                    needs_revision: current.needs_revision_threshold,
                    f1_score: current.metrics.f1_score,
                    timestamp: current.last_updated,
                });
            }
            LearningCycle::Skipped { reason } => {
                self.events.publish(ConsensusEvent::ThresholdCycleSkipped {
                    reason: reason.clone(),
                    timestamp: Utc::now(),
                });
            }
            LearningCycle::NotDue => {}
        }
        cycle
    }

    // =========================================================================
    // Reporting
    // =========================================================================

    /// Thresholds a request in this context would be judged against
    pub async fn thresholds(&self, context: &AdaptationContext) -> DecisionThresholds {
        self.state.lock().await.learner.thresholds(context)
    }

    /// The learned, context-free threshold config
    pub async fn threshold_config(&self) -> ThresholdConfig {
        self.state.lock().await.learner.base_config().clone()
    }

    pub async fn performance_report(&self) -> PerformanceReport {
        self.state.lock().await.learner.performance_report()
    }

    pub async fn health_report(&self) -> Option<PopulationHealthReport> {
        self.state.lock().await.engine.health_report()
    }

    pub async fn dashboard(&self) -> TelemetryDashboard {
        self.state.lock().await.telemetry.dashboard()
    }

    pub async fn process_discoveries(&self) -> Vec<ProcessedDiscovery> {
        self.state.lock().await.telemetry.process_discoveries()
    }

    pub async fn pending_count(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    /// Write out any buffered telemetry events as a batch
    pub async fn flush_telemetry(&self) {
        let snapshot = {
            let mut state = self.state.lock().await;
            let mut snapshot = state.snapshot();
            snapshot.batch = state.telemetry.flush();
            snapshot
        };
        self.write_snapshot(snapshot).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::StubOracle;
    use crate::state::store::{Codec, DocumentBackend, MemoryBackend};

    /// Memory backend that counts writes per collection
    #[derive(Default)]
    struct CountingBackend {
        inner: MemoryBackend,
        writes: StdMutex<BTreeMap<String, usize>>,
    }

    impl CountingBackend {
        fn writes(&self, collection: &str) -> usize {
            self.writes.lock().unwrap().get(collection).copied().unwrap_or(0)
        }
    }

    impl DocumentBackend for CountingBackend {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn codec(&self) -> Codec {
            self.inner.codec()
        }

        fn read(&self, collection: &str) -> StoreResult<Option<Vec<u8>>> {
            self.inner.read(collection)
        }

        fn write(&self, collection: &str, bytes: &[u8]) -> StoreResult<()> {
            *self.writes.lock().unwrap().entry(collection.to_string()).or_default() += 1;
            self.inner.write(collection, bytes)
        }
    }

    fn stub(id: &str, provider_type: &str, score: f64, confidence: f64) -> SharedOracle {
        StubOracle::new(id, provider_type)
            .with_jitter(0.0)
            .with_scores(ScoreVector::uniform(score))
            .with_confidence(confidence)
            .shared()
    }

    fn service(oracles: Vec<SharedOracle>) -> ValidationService {
        ValidationService::new(EngineConfig::default(), oracles, HistoryStore::in_memory().shared()).unwrap()
    }

    #[tokio::test]
    async fn test_no_oracles_fails_fast() {
        let result = ValidationService::new(EngineConfig::default(), Vec::new(), HistoryStore::in_memory().shared());
        assert!(matches!(result, Err(ServiceError::Config(ConfigError::NoOracles))));
    }

    #[tokio::test]
    async fn test_decision_approved() {
        let service = service(vec![
            stub("a", "claude", 85.0, 0.9),
            stub("b", "gemini", 82.0, 0.8),
            stub("c", "gpt", 88.0, 0.85),
        ]);
        let decision = service.validate(ValidationRequest::new("Read", "")).await;
        assert_eq!(decision.status, ValidationStatus::Approved);
        assert_eq!(decision.degradation, DegradationLevel::Full);
        assert_eq!(decision.population_size, 3);
        assert!(decision.confidence_interval.0 <= decision.consensus_score);
        assert_eq!(service.pending_count().await, 1);
    }

    #[tokio::test]
    async fn test_fallback_when_all_fail() {
        let service = service(vec![StubOracle::new("down", "stub").failing("offline").shared()]);
        let decision = service.validate(ValidationRequest::new("Read", "")).await;
        assert!(decision.is_fallback());
        assert_eq!(decision.status, ValidationStatus::NeedsRevision);
        assert!(decision.confidence <= 0.3);
        assert_eq!(decision.confidence_interval, (60.0, 80.0));
        assert_eq!(decision.failed_oracles.len(), 1);
    }

    #[tokio::test]
    async fn test_feedback_unknown_request() {
        let service = service(vec![stub("a", "claude", 85.0, 0.9)]);
        let result = service.record_feedback("missing", true).await;
        assert!(matches!(result, Err(ServiceError::UnknownRequest(_))));
    }

    #[tokio::test]
    async fn test_feedback_consumes_pending() {
        let service = service(vec![stub("a", "claude", 85.0, 0.9)]);
        let decision = service.validate(ValidationRequest::new("Read", "").with_id("req-1")).await;
        assert_eq!(decision.degradation, DegradationLevel::Partial);

        let cycle = service.record_feedback("req-1", true).await.unwrap();
        assert_eq!(cycle, LearningCycle::NotDue);
        assert_eq!(service.pending_count().await, 0);
        assert_eq!(service.store().load_outcomes().unwrap().len(), 1);
        assert!(service.record_feedback("req-1", true).await.is_err());
    }

    #[tokio::test]
    async fn test_state_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = EngineConfig::default();
        config.store.path = dir.path().to_path_buf();
        let oracles = || vec![stub("a", "claude", 85.0, 0.9), stub("b", "gpt", 83.0, 0.9)];

        {
            let store = HistoryStore::open(&config.store).unwrap().shared();
            let service = ValidationService::new(config.clone(), oracles(), store).unwrap();
            service.validate(ValidationRequest::new("Read", "").with_id("req-1")).await;
        }

        let store = HistoryStore::open(&config.store).unwrap().shared();
        let service = ValidationService::new(config, oracles(), store).unwrap();
        assert_eq!(service.pending_count().await, 1);
        assert!(service.health_report().await.is_some());
        service.record_feedback("req-1", true).await.unwrap();
    }

    #[tokio::test]
    async fn test_only_changed_collections_written() {
        let backend = Arc::new(CountingBackend::default());
        let store = HistoryStore::new(backend.clone()).shared();
        let oracles = vec![StubOracle::new("down", "stub").failing("offline").shared()];
        let service = ValidationService::new(EngineConfig::default(), oracles, store).unwrap();

        service.validate(ValidationRequest::new("Read", "").with_id("req-1")).await;

        assert_eq!(backend.writes(schema::COL_PENDING), 1);
        assert_eq!(backend.writes(schema::COL_TELEMETRY_EVENTS), 1);
        for untouched in [
            schema::COL_PROVIDERS,
            schema::COL_POPULATION_HISTORY,
            schema::COL_PATTERNS,
            schema::COL_DISCOVERIES,
            schema::COL_OUTCOMES,
            schema::COL_THRESHOLDS,
        ] {
            assert_eq!(backend.writes(untouched), 0, "{untouched}");
        }

        service.record_feedback("req-1", false).await.unwrap();
        assert_eq!(backend.writes(schema::COL_PENDING), 2);
        assert_eq!(backend.writes(schema::COL_OUTCOMES), 1);
        assert_eq!(backend.writes(schema::COL_TELEMETRY_EVENTS), 1);
    }

    #[test]
    fn test_superseded_snapshot_skipped() {
        let store = HistoryStore::in_memory();
        let mut written = BTreeMap::new();
        let outcome = |score| ValidationOutcome::new(score, ValidationStatus::Approved, true);

        let newer = Snapshot {
            seq: 2,
            outcomes: Some(vec![outcome(81.0), outcome(82.0)]),
            ..Default::default()
        };
        let older = Snapshot {
            seq: 1,
            outcomes: Some(vec![outcome(81.0)]),
            thresholds: Some(ThresholdConfig::default()),
            ..Default::default()
        };
        newer.write(&store, &mut written);
        older.write(&store, &mut written);

        assert_eq!(store.load_outcomes().unwrap().len(), 2);
        assert!(store.load_thresholds().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_concurrent_decisions_all_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = EngineConfig::default();
        config.store.path = dir.path().to_path_buf();
        let oracles = || vec![stub("a", "claude", 85.0, 0.9), stub("b", "gpt", 83.0, 0.9)];

        {
            let store = HistoryStore::open(&config.store).unwrap().shared();
            let service = ValidationService::new(config.clone(), oracles(), store).unwrap();
            let requests = (0..16).map(|i| service.validate(ValidationRequest::new("Read", "").with_id(format!("req-{i}"))));
            futures::future::join_all(requests).await;
        }

        let store = HistoryStore::open(&config.store).unwrap().shared();
        assert_eq!(store.load_pending().unwrap().len(), 16);
        assert_eq!(store.load_telemetry_events().unwrap().len(), 16);
    }
}
