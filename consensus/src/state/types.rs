//! Core data model for ensemble consensus
//!
//! Everything here is plain data: oracle score vectors, population members,
//! consensus results, learner history and telemetry records. Persisted types
//! avoid internally tagged enums and skipped fields so that both the JSON and
//! the binary store codecs round-trip them.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Provider identity key, `"{provider_type}:{provider_id}"`
pub type ProviderKey = String;

/// Request identifier shared by a decision and its later feedback
pub type RequestId = String;

/// Well-known score dimensions
pub mod dimensions {
    pub const PERFORMANCE: &str = "performance";
    pub const NOVELTY: &str = "novelty";
    pub const EFFICIENCY: &str = "efficiency";
    pub const SAFETY: &str = "safety";

    /// The four standard dimensions in canonical order
    pub const STANDARD: &[&str] = &[PERFORMANCE, NOVELTY, EFFICIENCY, SAFETY];
}

// ============================================================================
// Scores
// ============================================================================

/// Named dimension scores in [0, 100], ordered by dimension name.
///
/// Built once from an oracle response and never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScoreVector(BTreeMap<String, f64>);

impl ScoreVector {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Builder-style insert
    pub fn with(mut self, dimension: &str, score: f64) -> Self {
        self.0.insert(dimension.to_string(), score);
        self
    }

    /// Same score on every standard dimension
    pub fn uniform(score: f64) -> Self {
        dimensions::STANDARD
            .iter()
            .map(|d| (d.to_string(), score))
            .collect()
    }

    pub fn get(&self, dimension: &str) -> Option<f64> {
        self.0.get(dimension).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn dimensions(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, f64)> for ScoreVector {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Fixed dimension weights used to reduce a [`ScoreVector`] to one number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DimensionWeights(BTreeMap<String, f64>);

impl Default for DimensionWeights {
    fn default() -> Self {
        Self::from_pairs(&[
            (dimensions::PERFORMANCE, 0.4),
            (dimensions::NOVELTY, 0.3),
            (dimensions::EFFICIENCY, 0.2),
            (dimensions::SAFETY, 0.1),
        ])
    }
}

impl DimensionWeights {
    pub fn new(weights: BTreeMap<String, f64>) -> Self {
        Self(weights)
    }

    pub fn from_pairs(pairs: &[(&str, f64)]) -> Self {
        Self(pairs.iter().map(|(d, w)| (d.to_string(), *w)).collect())
    }

    pub fn get(&self, dimension: &str) -> Option<f64> {
        self.0.get(dimension).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Sum of all weights (1.0 for a valid configuration)
    pub fn total(&self) -> f64 {
        self.0.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Weighted score of a vector.
    ///
    /// Dimensions missing from the vector are left out and the remaining
    /// weights renormalised. Returns `None` when no weighted dimension is
    /// present at all.
    pub fn weighted_score(&self, scores: &ScoreVector) -> Option<f64> {
        let mut total = 0.0;
        let mut present = 0.0;
        for (dimension, weight) in self.iter() {
            if let Some(score) = scores.get(dimension) {
                total += weight * score;
                present += weight;
            }
        }
        (present > 0.0).then(|| total / present)
    }
}

// ============================================================================
// Population
// ============================================================================

/// Stable identity of one oracle
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProviderIdentity {
    pub provider_id: String,
    pub provider_type: String,
}

impl ProviderIdentity {
    pub fn new(provider_id: impl Into<String>, provider_type: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            provider_type: provider_type.into(),
        }
    }

    /// Key used for reliability, expertise, outliers and contributions
    pub fn key(&self) -> ProviderKey {
        format!("{}:{}", self.provider_type, self.provider_id)
    }
}

impl fmt::Display for ProviderIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider_type, self.provider_id)
    }
}

/// One oracle's successful validation result.
///
/// `diversity_score`, `reliability_score` and `expertise_weight` are derived
/// by the consensus engine, never by the oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationMember {
    pub identity: ProviderIdentity,
    pub weighted_score: f64,
    pub scores: ScoreVector,
    pub confidence: f64,
    pub rationale: String,
    pub latency_ms: u64,
    pub token_cost: u64,
    /// Produced by a stub oracle rather than a real provider
    pub demo: bool,

    pub diversity_score: f64,
    pub reliability_score: f64,
    pub expertise_weight: f64,
}

impl PopulationMember {
    pub fn new(
        identity: ProviderIdentity,
        weighted_score: f64,
        scores: ScoreVector,
        confidence: f64,
    ) -> Self {
        Self {
            identity,
            weighted_score,
            scores,
            confidence,
            rationale: String::new(),
            latency_ms: 0,
            token_cost: 0,
            demo: false,
            diversity_score: 0.0,
            reliability_score: 1.0,
            expertise_weight: 1.0,
        }
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = rationale.into();
        self
    }

    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn with_token_cost(mut self, token_cost: u64) -> Self {
        self.token_cost = token_cost;
        self
    }

    pub fn key(&self) -> ProviderKey {
        self.identity.key()
    }

    /// Latency in seconds
    pub fn latency_secs(&self) -> f64 {
        self.latency_ms as f64 / 1000.0
    }
}

/// Ordered members for one validation request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Population {
    members: Vec<PopulationMember>,
}

impl Population {
    pub fn new(members: Vec<PopulationMember>) -> Self {
        Self { members }
    }

    pub fn push(&mut self, member: PopulationMember) {
        self.members.push(member);
    }

    pub fn members(&self) -> &[PopulationMember] {
        &self.members
    }

    pub fn members_mut(&mut self) -> &mut [PopulationMember] {
        &mut self.members
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PopulationMember> {
        self.members.iter()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Weighted scores in member order
    pub fn scores(&self) -> Vec<f64> {
        self.members.iter().map(|m| m.weighted_score).collect()
    }

    /// Distinct provider types, sorted
    pub fn provider_types(&self) -> Vec<String> {
        self.members
            .iter()
            .map(|m| m.identity.provider_type.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

impl FromIterator<PopulationMember> for Population {
    fn from_iter<I: IntoIterator<Item = PopulationMember>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Population {
    type Item = &'a PopulationMember;
    type IntoIter = std::slice::Iter<'a, PopulationMember>;

    fn into_iter(self) -> Self::IntoIter {
        self.members.iter()
    }
}

// ============================================================================
// Consensus
// ============================================================================

/// Aggregation strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusMethod {
    WeightedAverage,
    Median,
    BayesianFusion,
    OutlierResistant,
    #[default]
    DiversityWeighted,
}

impl ConsensusMethod {
    pub const ALL: [ConsensusMethod; 5] = [
        ConsensusMethod::WeightedAverage,
        ConsensusMethod::Median,
        ConsensusMethod::BayesianFusion,
        ConsensusMethod::OutlierResistant,
        ConsensusMethod::DiversityWeighted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WeightedAverage => "weighted_average",
            Self::Median => "median",
            Self::BayesianFusion => "bayesian_fusion",
            Self::OutlierResistant => "outlier_resistant",
            Self::DiversityWeighted => "diversity_weighted",
        }
    }
}

impl fmt::Display for ConsensusMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConsensusMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "weighted_average" | "weighted" => Ok(Self::WeightedAverage),
            "median" | "median_consensus" => Ok(Self::Median),
            "bayesian_fusion" | "bayesian" => Ok(Self::BayesianFusion),
            "outlier_resistant" | "robust" => Ok(Self::OutlierResistant),
            "diversity_weighted" | "diversity" => Ok(Self::DiversityWeighted),
            other => Err(format!("unknown consensus method: {other}")),
        }
    }
}

/// Mean/std/min/max of a set of values
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Distribution {
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

/// Population-level summary attached to a consensus result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PopulationDynamics {
    pub population_size: usize,
    pub diversity_index: f64,
    /// `1 - min(1, stddev(scores) / 100)`
    pub consensus_strength: f64,
    pub outlier_count: usize,
    pub reliability_variance: f64,
    /// Seconds
    pub latency: Distribution,
    pub expertise: Distribution,
    pub provider_types: BTreeMap<String, usize>,
}

/// Output of one consensus calculation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub consensus_score: f64,
    pub method: ConsensusMethod,
    pub confidence_level: f64,
    /// 1.0 is perfect agreement
    pub population_agreement: f64,
    pub outliers: Vec<ProviderKey>,
    pub diversity_impact: f64,
    /// Sums to 1 over included members
    pub member_contributions: BTreeMap<ProviderKey, f64>,
    pub consensus_uncertainty: f64,
    pub recommendation_strength: f64,
    pub reasoning: String,
    pub dynamics: PopulationDynamics,
    /// Structurally valid placeholder produced without any oracle input
    pub fallback: bool,
}

/// Decision outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Approved,
    NeedsRevision,
    Rejected,
}

impl ValidationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::NeedsRevision => "needs_revision",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a metric between the first and last point of a window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Declining,
    Stable,
}

impl Trend {
    /// Compare two observations of a metric
    pub fn between(first: f64, last: f64, higher_is_better: bool) -> Self {
        if (last - first).abs() < f64::EPSILON {
            Trend::Stable
        } else if (last > first) == higher_is_better {
            Trend::Improving
        } else {
            Trend::Declining
        }
    }
}

// ============================================================================
// Threshold learning
// ============================================================================

/// A decision paired with its ground-truth outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub request_id: RequestId,
    pub timestamp: DateTime<Utc>,
    pub predicted_score: f64,
    pub predicted_status: ValidationStatus,
    pub actual_success: bool,
    pub confidence: f64,
    pub scores: ScoreVector,
    pub providers: Vec<ProviderKey>,
}

impl ValidationOutcome {
    /// Minimal outcome, mostly useful for tests and replay tools
    pub fn new(predicted_score: f64, predicted_status: ValidationStatus, actual_success: bool) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            predicted_score,
            predicted_status,
            actual_success,
            confidence: 0.0,
            scores: ScoreVector::new(),
            providers: Vec::new(),
        }
    }
}

/// Confusion-matrix metrics, "predicted approved" is the positive class
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub precision: f64,
    pub recall: f64,
    pub accuracy: f64,
    pub f1_score: f64,
    pub approved_success_rate: f64,
    pub total: usize,
    pub true_positives: usize,
    pub false_positives: usize,
    pub true_negatives: usize,
    pub false_negatives: usize,
}

/// Thresholds used for one decision
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecisionThresholds {
    pub approved: f64,
    pub needs_revision: f64,
    pub confidence_minimum: f64,
}

impl DecisionThresholds {
    /// Map a consensus score and confidence to a status.
    ///
    /// A score above the approval line with too little confidence is held
    /// at `needs_revision`.
    pub fn status_for(&self, score: f64, confidence: f64) -> ValidationStatus {
        if score >= self.approved && confidence >= self.confidence_minimum {
            ValidationStatus::Approved
        } else if score >= self.needs_revision {
            ValidationStatus::NeedsRevision
        } else {
            ValidationStatus::Rejected
        }
    }
}

/// The live, learned decision boundaries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    pub approved_threshold: f64,
    pub needs_revision_threshold: f64,
    pub confidence_minimum: f64,
    /// Metrics of the window that produced this config
    pub metrics: PerformanceMetrics,
    /// Best F1 found by the threshold sweep
    pub optimized_f1: Option<f64>,
    pub roc_auc: Option<f64>,
    /// Learning cycles applied so far
    pub cycles: u64,
    pub last_updated: DateTime<Utc>,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            approved_threshold: 80.0,
            needs_revision_threshold: 60.0,
            confidence_minimum: 0.7,
            metrics: PerformanceMetrics::default(),
            optimized_f1: None,
            roc_auc: None,
            cycles: 0,
            last_updated: Utc::now(),
        }
    }
}

impl ThresholdConfig {
    pub fn thresholds(&self) -> DecisionThresholds {
        DecisionThresholds {
            approved: self.approved_threshold,
            needs_revision: self.needs_revision_threshold,
            confidence_minimum: self.confidence_minimum,
        }
    }
}

/// Decision awaiting ground-truth feedback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingDecision {
    pub request_id: RequestId,
    pub predicted_score: f64,
    pub predicted_status: ValidationStatus,
    pub confidence: f64,
    pub scores: ScoreVector,
    pub providers: Vec<ProviderKey>,
    pub decided_at: DateTime<Utc>,
}

impl PendingDecision {
    pub fn into_outcome(self, actual_success: bool) -> ValidationOutcome {
        ValidationOutcome {
            request_id: self.request_id,
            timestamp: Utc::now(),
            predicted_score: self.predicted_score,
            predicted_status: self.predicted_status,
            actual_success,
            confidence: self.confidence,
            scores: self.scores,
            providers: self.providers,
        }
    }
}

// ============================================================================
// Provider state
// ============================================================================

/// Learned per-provider state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderRecord {
    pub provider_type: String,
    pub reliability: f64,
    pub expertise: f64,
    pub observations: u64,
    pub last_seen: DateTime<Utc>,
}

/// One entry of the consensus history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationHistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub population_size: usize,
    pub consensus_score: f64,
    pub method: ConsensusMethod,
    pub confidence_level: f64,
    pub diversity_index: f64,
    pub outlier_count: usize,
    pub provider_types: Vec<String>,
}

// ============================================================================
// Telemetry
// ============================================================================

/// Recurring signatures merged by key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    LowDiversityConsensus,
    ProviderOutlierTendency,
}

impl PatternType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LowDiversityConsensus => "low_diversity_consensus",
            Self::ProviderOutlierTendency => "provider_outlier_tendency",
        }
    }
}

impl fmt::Display for PatternType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One-off observations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryType {
    OptimalValidationConditions,
    EfficientValidation,
    QualityImprovement,
}

impl DiscoveryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OptimalValidationConditions => "optimal_validation_conditions",
            Self::EfficientValidation => "efficient_validation",
            Self::QualityImprovement => "quality_improvement",
        }
    }
}

impl fmt::Display for DiscoveryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationPattern {
    pub pattern_type: PatternType,
    pub signature: String,
    pub occurrences: u64,
    /// Smoothed as `0.8 * old + 0.2 * new`
    pub effectiveness: f64,
    pub providers: BTreeSet<ProviderKey>,
    pub first_detected: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl ValidationPattern {
    pub fn key(&self) -> String {
        pattern_key(self.pattern_type, &self.signature)
    }
}

/// Merge key for a pattern
pub fn pattern_key(pattern_type: PatternType, signature: &str) -> String {
    format!("{}:{}", pattern_type, signature)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationDiscovery {
    pub id: String,
    pub discovery_type: DiscoveryType,
    pub description: String,
    pub confidence: f64,
    pub impact: f64,
    pub providers: Vec<ProviderKey>,
    /// Numeric observations behind the discovery
    pub data: BTreeMap<String, f64>,
    pub recorded_at: DateTime<Utc>,
}

/// What telemetry sees of one consensus decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusSummary {
    pub request_id: RequestId,
    pub recorded_at: DateTime<Utc>,
    pub consensus_score: f64,
    pub confidence: f64,
    pub diversity_index: f64,
    pub population_size: usize,
    pub outliers: Vec<ProviderKey>,
    pub providers: Vec<ProviderKey>,
    pub method: ConsensusMethod,
    pub elapsed_secs: f64,
    pub total_tokens: u64,
    pub fallback: bool,
}

/// Snapshot written when the telemetry buffer fills up
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryBatch {
    pub batch_id: String,
    pub flushed_at: DateTime<Utc>,
    pub events: Vec<ConsensusSummary>,
    pub discovery_count: usize,
    pub pattern_count: usize,
}
