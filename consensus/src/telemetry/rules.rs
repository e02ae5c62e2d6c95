//! Pattern and discovery rules
//!
//! Each rule looks at one consensus summary (and, for the trend rule, the
//! recent score series) and may produce one finding. Rules are independent;
//! any number of them can fire for the same event.

use std::collections::{BTreeMap, BTreeSet};

use crate::ensemble::stats;
use crate::state::{ConsensusSummary, DiscoveryType, PatternType, ProviderKey};

/// Scores considered by the trend rule
pub const TREND_SCORES: usize = 10;
/// Minimum scores before the trend rule can fire
pub const TREND_MIN_SCORES: usize = 5;

/// Raw output of a rule, before merging into collector state
#[derive(Debug, Clone, PartialEq)]
pub enum Finding {
    Pattern {
        pattern_type: PatternType,
        signature: String,
        effectiveness: f64,
        providers: BTreeSet<ProviderKey>,
    },
    Discovery {
        discovery_type: DiscoveryType,
        description: String,
        confidence: f64,
        impact: f64,
        providers: Vec<ProviderKey>,
        data: BTreeMap<String, f64>,
    },
}

fn data(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

/// High agreement among near-identical members; possible groupthink
pub fn low_diversity_consensus(summary: &ConsensusSummary) -> Option<Finding> {
    if summary.consensus_score > 85.0 && summary.diversity_index < 0.1 && summary.population_size >= 3 {
        Some(Finding::Pattern {
            pattern_type: PatternType::LowDiversityConsensus,
            signature: format!(
                "consensus_{}_diversity_{}",
                summary.consensus_score as i64,
                (summary.diversity_index * 100.0) as i64
            ),
            effectiveness: 0.6,
            providers: summary.providers.iter().cloned().collect(),
        })
    } else {
        None
    }
}

/// High agreement reached by a diverse population
pub fn optimal_conditions(summary: &ConsensusSummary) -> Option<Finding> {
    if summary.consensus_score > 80.0 && summary.diversity_index > 0.3 && summary.outliers.len() <= 1 {
        Some(Finding::Discovery {
            discovery_type: DiscoveryType::OptimalValidationConditions,
            description: format!(
                "Consensus {:.1} with diversity {:.2} across {} providers",
                summary.consensus_score, summary.diversity_index, summary.population_size
            ),
            confidence: 0.85,
            impact: 0.9,
            providers: summary.providers.clone(),
            data: data(&[
                ("consensus_score", summary.consensus_score),
                ("diversity_index", summary.diversity_index),
                ("outliers", summary.outliers.len() as f64),
            ]),
        })
    } else {
        None
    }
}

/// Good consensus reached in under a second
pub fn efficient_validation(summary: &ConsensusSummary) -> Option<Finding> {
    if summary.elapsed_secs < 1.0 && summary.consensus_score > 75.0 && summary.population_size >= 3 {
        let efficiency = summary.consensus_score / summary.elapsed_secs.max(0.01);
        Some(Finding::Discovery {
            discovery_type: DiscoveryType::EfficientValidation,
            description: format!(
                "Consensus {:.1} reached in {:.2}s",
                summary.consensus_score, summary.elapsed_secs
            ),
            confidence: 0.75,
            impact: 0.7,
            providers: summary.providers.clone(),
            data: data(&[
                ("consensus_score", summary.consensus_score),
                ("elapsed_secs", summary.elapsed_secs),
                ("efficiency_ratio", efficiency),
            ]),
        })
    } else {
        None
    }
}

/// The same providers keep landing outside the population
pub fn provider_outlier_tendency(summary: &ConsensusSummary) -> Option<Finding> {
    if summary.outliers.is_empty() || summary.population_size <= 3 {
        return None;
    }
    let outliers: BTreeSet<ProviderKey> = summary.outliers.iter().cloned().collect();
    let signature = outliers.iter().map(String::as_str).collect::<Vec<_>>().join(",");
    Some(Finding::Pattern {
        pattern_type: PatternType::ProviderOutlierTendency,
        signature,
        effectiveness: 0.8,
        providers: outliers,
    })
}

/// Consensus scores trending upwards
///
/// `recent_scores` is oldest first and includes the current event.
pub fn quality_improvement(summary: &ConsensusSummary, recent_scores: &[f64]) -> Option<Finding> {
    let start = recent_scores.len().saturating_sub(TREND_SCORES);
    let window = &recent_scores[start..];
    if window.len() < TREND_MIN_SCORES {
        return None;
    }
    let slope = stats::linear_slope(window);
    if slope > 2.0 {
        Some(Finding::Discovery {
            discovery_type: DiscoveryType::QualityImprovement,
            description: format!(
                "Consensus rising by {:.2} per validation over the last {} validations",
                slope,
                window.len()
            ),
            confidence: 0.8,
            impact: 0.8,
            providers: summary.providers.clone(),
            data: data(&[("slope", slope), ("window", window.len() as f64)]),
        })
    } else {
        None
    }
}

/// Run every rule; fallback summaries never match
pub fn evaluate(summary: &ConsensusSummary, recent_scores: &[f64]) -> Vec<Finding> {
    if summary.fallback {
        return Vec::new();
    }
    [
        low_diversity_consensus(summary),
        optimal_conditions(summary),
        efficient_validation(summary),
        provider_outlier_tendency(summary),
        quality_improvement(summary, recent_scores),
    ]
    .into_iter()
    .flatten()
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ConsensusMethod;
    use chrono::Utc;

    fn summary(score: f64, diversity: f64, size: usize) -> ConsensusSummary {
        ConsensusSummary {
            request_id: "req".to_string(),
            recorded_at: Utc::now(),
            consensus_score: score,
            confidence: 0.8,
            diversity_index: diversity,
            population_size: size,
            outliers: Vec::new(),
            providers: (0..size).map(|i| format!("stub:{i}")).collect(),
            method: ConsensusMethod::DiversityWeighted,
            elapsed_secs: 2.0,
            total_tokens: 0,
            fallback: false,
        }
    }

    #[test]
    fn test_low_diversity_signature() {
        let finding = low_diversity_consensus(&summary(90.4, 0.05, 3)).unwrap();
        match finding {
            Finding::Pattern { signature, effectiveness, .. } => {
                assert_eq!(signature, "consensus_90_diversity_5");
                assert_eq!(effectiveness, 0.6);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(low_diversity_consensus(&summary(90.0, 0.05, 2)).is_none());
    }

    #[test]
    fn test_optimal_conditions_allows_one_outlier() {
        let mut s = summary(85.0, 0.5, 4);
        s.outliers = vec!["stub:0".to_string()];
        assert!(optimal_conditions(&s).is_some());
        s.outliers.push("stub:1".to_string());
        assert!(optimal_conditions(&s).is_none());
    }

    #[test]
    fn test_efficient_validation_ratio() {
        let mut s = summary(80.0, 0.5, 3);
        s.elapsed_secs = 0.5;
        match efficient_validation(&s).unwrap() {
            Finding::Discovery { data, .. } => assert_eq!(data["efficiency_ratio"], 160.0),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_outlier_signature_is_sorted() {
        let mut s = summary(80.0, 0.5, 4);
        s.outliers = vec!["stub:3".to_string(), "stub:1".to_string()];
        match provider_outlier_tendency(&s).unwrap() {
            Finding::Pattern { signature, .. } => assert_eq!(signature, "stub:1,stub:3"),
            other => panic!("unexpected {:?}", other),
        }
        let mut small = summary(80.0, 0.5, 3);
        small.outliers = vec!["stub:0".to_string()];
        assert!(provider_outlier_tendency(&small).is_none());
    }

    #[test]
    fn test_quality_improvement_needs_five_scores() {
        let s = summary(80.0, 0.0, 1);
        assert!(quality_improvement(&s, &[60.0, 65.0, 70.0, 75.0]).is_none());
        assert!(quality_improvement(&s, &[60.0, 65.0, 70.0, 75.0, 80.0]).is_some());
        assert!(quality_improvement(&s, &[80.0, 80.5, 81.0, 81.5, 82.0]).is_none());
    }

    #[test]
    fn test_fallback_never_matches() {
        let mut s = summary(90.0, 0.0, 3);
        s.fallback = true;
        assert!(evaluate(&s, &[]).is_empty());
    }
}
