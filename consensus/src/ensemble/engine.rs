//! Population consensus engine
//!
//! Owns the learned per-provider state (reliability, expertise) and the
//! consensus history. One call to [`ConsensusEngine::consensus`] runs the
//! full cycle: metric refresh, outlier detection, diversity scoring,
//! aggregation, dynamics summary and expertise adaptation. The engine is a
//! plain owned value; callers serialise access to it and persist its state
//! through the history store.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::diversity;
use super::methods;
use super::outliers::{self, OutlierSet};
use super::stats;
use crate::state::{
    schema::caps, ConsensusMethod, ConsensusResult, Population, PopulationDynamics,
    PopulationHistoryEntry, ProviderKey, ProviderRecord, Trend,
};

/// Consensus engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    pub method: ConsensusMethod,
    /// Z-score above which a member is an outlier
    pub outlier_threshold: f64,
    /// EMA decay for reliability
    pub reliability_decay: f64,
    pub expertise_adaptation_rate: f64,
    /// Populations below this size are accepted with a warning
    pub min_population: usize,
    /// Starting expertise by provider type (lowercase)
    pub expertise_defaults: BTreeMap<String, f64>,
    pub default_expertise: f64,
    pub fallback_score: f64,
    pub fallback_confidence: f64,
    /// Half-width of the fallback confidence interval
    pub fallback_spread: f64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        let expertise_defaults = [("claude", 1.0), ("gemini", 0.9), ("gpt", 0.95), ("local", 0.8)]
            .iter()
            .map(|(t, w)| (t.to_string(), *w))
            .collect();
        Self {
            method: ConsensusMethod::DiversityWeighted,
            outlier_threshold: 2.0,
            reliability_decay: 0.95,
            expertise_adaptation_rate: 0.1,
            min_population: 3,
            expertise_defaults,
            default_expertise: 0.8,
            fallback_score: 70.0,
            fallback_confidence: 0.3,
            fallback_spread: 10.0,
        }
    }
}

impl ConsensusConfig {
    /// Starting expertise for an unseen provider
    pub fn expertise_for_type(&self, provider_type: &str) -> f64 {
        self.expertise_defaults
            .get(&provider_type.to_lowercase())
            .copied()
            .unwrap_or(self.default_expertise)
    }
}

/// Reliability bounds
const RELIABILITY_MIN: f64 = 0.1;
const RELIABILITY_MAX: f64 = 1.0;

/// Expertise bounds
const EXPERTISE_MIN: f64 = 0.1;
const EXPERTISE_MAX: f64 = 2.0;

/// Events considered by the health report
const HEALTH_WINDOW: usize = 20;

/// Summary of recent consensus behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationHealthReport {
    pub total_events: usize,
    pub average_diversity: f64,
    pub average_confidence: f64,
    pub average_outliers: f64,
    pub provider_count: usize,
    pub reliability: BTreeMap<ProviderKey, f64>,
    pub expertise: BTreeMap<ProviderKey, f64>,
    pub diversity_trend: Trend,
    pub confidence_trend: Trend,
    pub outlier_trend: Trend,
    pub recommendations: Vec<String>,
}

/// Stateful consensus engine
#[derive(Debug, Clone)]
pub struct ConsensusEngine {
    config: ConsensusConfig,
    providers: BTreeMap<ProviderKey, ProviderRecord>,
    history: Vec<PopulationHistoryEntry>,
}

impl ConsensusEngine {
    pub fn new(config: ConsensusConfig) -> Self {
        Self::with_state(config, BTreeMap::new(), Vec::new())
    }

    /// Resume from persisted provider state and history
    pub fn with_state(
        config: ConsensusConfig,
        providers: BTreeMap<ProviderKey, ProviderRecord>,
        mut history: Vec<PopulationHistoryEntry>,
    ) -> Self {
        let excess = history.len().saturating_sub(caps::POPULATION_HISTORY);
        history.drain(..excess);
        Self {
            config,
            providers,
            history,
        }
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    pub fn providers(&self) -> &BTreeMap<ProviderKey, ProviderRecord> {
        &self.providers
    }

    pub fn history(&self) -> &[PopulationHistoryEntry] {
        &self.history
    }

    /// Full consensus cycle over a population.
    ///
    /// Derived member fields are refreshed in place. An empty population
    /// yields the fallback result and leaves state untouched.
    pub fn consensus(&mut self, population: &mut Population, method: ConsensusMethod) -> ConsensusResult {
        if population.is_empty() {
            warn!(method = %method, "Consensus requested for an empty population");
            return self.fallback_result(method, "empty population");
        }
        if population.len() < self.config.min_population {
            warn!(
                size = population.len(),
                minimum = self.config.min_population,
                "Population below minimum size"
            );
        }

        self.refresh_member_metrics(population);
        let outliers = outliers::detect_outliers(population, self.config.outlier_threshold);
        diversity::assign_member_diversity(population);

        let mut result = methods::aggregate(method, population, &outliers);
        result.dynamics = self.analyze_dynamics(population, &outliers);

        self.adapt_expertise(population, result.consensus_score);
        self.record_history(population, &result);

        info!(
            method = %method,
            size = population.len(),
            score = result.consensus_score,
            confidence = result.confidence_level,
            agreement = result.population_agreement,
            outliers = result.outliers.len(),
            "Consensus reached"
        );

        result
    }

    /// Low-confidence placeholder used when no oracle produced a result
    pub fn fallback_result(&self, method: ConsensusMethod, reason: &str) -> ConsensusResult {
        ConsensusResult {
            consensus_score: self.config.fallback_score,
            method,
            confidence_level: self.config.fallback_confidence.min(0.3),
            population_agreement: 0.0,
            outliers: Vec::new(),
            diversity_impact: 0.0,
            member_contributions: BTreeMap::new(),
            consensus_uncertainty: self.config.fallback_spread,
            recommendation_strength: 0.0,
            reasoning: format!("Fallback result: {}", reason),
            dynamics: PopulationDynamics::default(),
            fallback: true,
        }
    }

    // =========================================================================
    // Cycle steps
    // =========================================================================

    /// EMA-update reliability and load expertise for every member
    fn refresh_member_metrics(&mut self, population: &mut Population) {
        let decay = self.config.reliability_decay;
        let now = Utc::now();
        for member in population.members_mut() {
            let key = member.key();
            let expertise = self.config.expertise_for_type(&member.identity.provider_type);
            let record = self.providers.entry(key).or_insert_with(|| ProviderRecord {
                provider_type: member.identity.provider_type.clone(),
                reliability: 1.0,
                expertise,
                observations: 0,
                last_seen: now,
            });

            record.reliability = (decay * record.reliability + (1.0 - decay) * member.confidence)
                .clamp(RELIABILITY_MIN, RELIABILITY_MAX);
            record.observations += 1;
            record.last_seen = now;

            member.reliability_score = record.reliability;
            member.expertise_weight = record.expertise.clamp(EXPERTISE_MIN, EXPERTISE_MAX);
        }
    }

    fn analyze_dynamics(&self, population: &Population, outliers: &OutlierSet) -> PopulationDynamics {
        let scores = population.scores();
        let reliabilities: Vec<f64> = population.iter().map(|m| m.reliability_score).collect();
        let latencies: Vec<f64> = population.iter().map(|m| m.latency_secs()).collect();
        let expertise: Vec<f64> = population.iter().map(|m| m.expertise_weight).collect();

        let mut provider_types = BTreeMap::new();
        for member in population {
            *provider_types
                .entry(member.identity.provider_type.clone())
                .or_insert(0) += 1;
        }

        PopulationDynamics {
            population_size: population.len(),
            diversity_index: diversity::diversity_index(population),
            consensus_strength: 1.0 - (stats::std_dev(&scores) / 100.0).min(1.0),
            outlier_count: outliers.count(),
            reliability_variance: stats::variance(&reliabilities),
            latency: stats::distribution(&latencies),
            expertise: stats::distribution(&expertise),
            provider_types,
        }
    }

    /// Reward members whose score landed close to the consensus
    fn adapt_expertise(&mut self, population: &Population, consensus_score: f64) {
        let rate = self.config.expertise_adaptation_rate;
        for member in population {
            let distance = (member.weighted_score - consensus_score).abs() / 100.0;
            let performance = 1.0 - distance;
            if let Some(record) = self.providers.get_mut(&member.key()) {
                record.expertise =
                    (record.expertise + rate * (performance - 0.5)).clamp(EXPERTISE_MIN, EXPERTISE_MAX);
                debug!(provider = %member.identity, expertise = record.expertise, "Expertise adapted");
            }
        }
    }

    fn record_history(&mut self, population: &Population, result: &ConsensusResult) {
        self.history.push(PopulationHistoryEntry {
            timestamp: Utc::now(),
            population_size: population.len(),
            consensus_score: result.consensus_score,
            method: result.method,
            confidence_level: result.confidence_level,
            diversity_index: result.dynamics.diversity_index,
            outlier_count: result.outliers.len(),
            provider_types: population.provider_types(),
        });
        let excess = self.history.len().saturating_sub(caps::POPULATION_HISTORY);
        self.history.drain(..excess);
    }

    // =========================================================================
    // Reporting
    // =========================================================================

    /// Health of the recent population, `None` without any history
    pub fn health_report(&self) -> Option<PopulationHealthReport> {
        let start = self.history.len().saturating_sub(HEALTH_WINDOW);
        let recent = &self.history[start..];
        let (first, last) = (recent.first()?, recent.last()?);

        let diversity: Vec<f64> = recent.iter().map(|h| h.diversity_index).collect();
        let confidence: Vec<f64> = recent.iter().map(|h| h.confidence_level).collect();
        let outliers: Vec<f64> = recent.iter().map(|h| h.outlier_count as f64).collect();

        Some(PopulationHealthReport {
            total_events: self.history.len(),
            average_diversity: stats::mean(&diversity),
            average_confidence: stats::mean(&confidence),
            average_outliers: stats::mean(&outliers),
            provider_count: self.providers.len(),
            reliability: self.providers.iter().map(|(k, r)| (k.clone(), r.reliability)).collect(),
            expertise: self.providers.iter().map(|(k, r)| (k.clone(), r.expertise)).collect(),
            diversity_trend: Trend::between(first.diversity_index, last.diversity_index, true),
            confidence_trend: Trend::between(first.confidence_level, last.confidence_level, true),
            outlier_trend: Trend::between(first.outlier_count as f64, last.outlier_count as f64, false),
            recommendations: population_recommendations(recent),
        })
    }
}

fn population_recommendations(recent: &[PopulationHistoryEntry]) -> Vec<String> {
    let mut recommendations = Vec::new();
    let Some(last) = recent.last() else {
        return vec!["Insufficient history for recommendations".to_string()];
    };

    let avg_diversity = stats::mean(&recent.iter().map(|h| h.diversity_index).collect::<Vec<_>>());
    let avg_confidence = stats::mean(&recent.iter().map(|h| h.confidence_level).collect::<Vec<_>>());
    let avg_outliers = stats::mean(&recent.iter().map(|h| h.outlier_count as f64).collect::<Vec<_>>());

    if avg_diversity < 0.3 {
        recommendations.push("Population diversity is low; add providers of other types".to_string());
    }
    if avg_confidence < 0.6 {
        recommendations
            .push("Average confidence is low; review thresholds and provider reliability".to_string());
    }
    if avg_outliers > last.provider_types.len() as f64 * 0.3 {
        recommendations.push("High outlier rate; check provider calibration".to_string());
    }
    let types: BTreeSet<&str> = recent
        .iter()
        .flat_map(|h| h.provider_types.iter().map(String::as_str))
        .collect();
    if types.len() < 2 {
        recommendations.push("Population lacks provider variety; add a different provider type".to_string());
    }

    if recommendations.is_empty() {
        recommendations.push("Population health is good; keep the current configuration".to_string());
    }
    recommendations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{PopulationMember, ProviderIdentity, ScoreVector};

    fn member(id: &str, provider_type: &str, score: f64, confidence: f64) -> PopulationMember {
        PopulationMember::new(
            ProviderIdentity::new(id, provider_type),
            score,
            ScoreVector::uniform(score),
            confidence,
        )
    }

    fn population() -> Population {
        Population::new(vec![
            member("a", "claude", 85.0, 0.9),
            member("b", "gemini", 82.0, 0.8),
            member("c", "gpt", 88.0, 0.85),
        ])
    }

    #[test]
    fn test_first_sight_reliability_and_expertise() {
        let mut engine = ConsensusEngine::new(ConsensusConfig::default());
        let mut population = population();
        engine.consensus(&mut population, ConsensusMethod::DiversityWeighted);

        let member = &population.members()[0];
        assert!((member.reliability_score - (0.95 + 0.05 * 0.9)).abs() < 1e-9);
        assert_eq!(member.expertise_weight, 1.0);
        assert_eq!(population.members()[1].expertise_weight, 0.9);
        assert_eq!(engine.providers()["claude:a"].observations, 1);
    }

    #[test]
    fn test_reliability_ema_across_calls() {
        let mut engine = ConsensusEngine::new(ConsensusConfig::default());
        for _ in 0..2 {
            let mut population = Population::new(vec![member("a", "local", 80.0, 0.2)]);
            engine.consensus(&mut population, ConsensusMethod::Median);
        }
        let first = 0.95 + 0.05 * 0.2;
        let second = 0.95 * first + 0.05 * 0.2;
        assert!((engine.providers()["local:a"].reliability - second).abs() < 1e-9);
    }

    #[test]
    fn test_expertise_rewards_proximity() {
        let mut engine = ConsensusEngine::new(ConsensusConfig::default());
        let mut population = Population::new(vec![
            member("near", "claude", 84.0, 0.9),
            member("near2", "claude", 86.0, 0.9),
            member("far", "claude", 30.0, 0.9),
        ]);
        let result = engine.consensus(&mut population, ConsensusMethod::Median);
        let near = engine.providers()["claude:near"].expertise;
        let far = engine.providers()["claude:far"].expertise;
        assert!(near > 1.0);
        assert!(far < near);

        let expected_far = 1.0 + 0.1 * (1.0 - (30.0 - result.consensus_score).abs() / 100.0 - 0.5);
        assert!((far - expected_far).abs() < 1e-9);
    }

    #[test]
    fn test_expertise_clamped() {
        let config = ConsensusConfig {
            expertise_adaptation_rate: 10.0,
            ..ConsensusConfig::default()
        };
        let mut engine = ConsensusEngine::new(config);
        let mut population = population();
        engine.consensus(&mut population, ConsensusMethod::Median);
        assert!(engine.providers().values().all(|r| r.expertise <= 2.0 && r.expertise >= 0.1));
    }

    #[test]
    fn test_dynamics_attached() {
        let mut engine = ConsensusEngine::new(ConsensusConfig::default());
        let mut population = population();
        let result = engine.consensus(&mut population, ConsensusMethod::DiversityWeighted);
        assert_eq!(result.dynamics.population_size, 3);
        assert_eq!(result.dynamics.provider_types.len(), 3);
        assert!(result.dynamics.consensus_strength > 0.95);
        assert!((result.consensus_score - 85.0).abs() < 2.0);
        assert!(!result.fallback);
    }

    #[test]
    fn test_empty_population_falls_back() {
        let mut engine = ConsensusEngine::new(ConsensusConfig::default());
        let mut population = Population::default();
        let result = engine.consensus(&mut population, ConsensusMethod::DiversityWeighted);
        assert!(result.fallback);
        assert!(result.confidence_level <= 0.3);
        assert_eq!(result.consensus_score, 70.0);
        assert!(engine.history().is_empty());
    }

    #[test]
    fn test_history_capped() {
        let mut engine = ConsensusEngine::new(ConsensusConfig::default());
        for _ in 0..(caps::POPULATION_HISTORY + 7) {
            let mut population = population();
            engine.consensus(&mut population, ConsensusMethod::Median);
        }
        assert_eq!(engine.history().len(), caps::POPULATION_HISTORY);
    }

    #[test]
    fn test_health_report() {
        let mut engine = ConsensusEngine::new(ConsensusConfig::default());
        assert!(engine.health_report().is_none());

        for _ in 0..3 {
            let mut population = Population::new(vec![
                member("a", "local", 70.0, 0.4),
                member("b", "local", 71.0, 0.4),
            ]);
            engine.consensus(&mut population, ConsensusMethod::Median);
        }
        let report = engine.health_report().unwrap();
        assert_eq!(report.total_events, 3);
        assert_eq!(report.provider_count, 2);
        assert!(report
            .recommendations
            .iter()
            .any(|r| r.contains("provider variety")));
        assert!(report.recommendations.iter().any(|r| r.contains("diversity is low")));
    }

    #[test]
    fn test_expertise_defaults_by_type() {
        let config = ConsensusConfig::default();
        assert_eq!(config.expertise_for_type("GPT"), 0.95);
        assert_eq!(config.expertise_for_type("mistral"), 0.8);
    }
}
