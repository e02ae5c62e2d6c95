//! Property tests for the consensus engine
//!
//! Checks invariants that must hold for every consensus method over a range
//! of hand-picked populations.

use ensemble_consensus::ensemble::methods;
use ensemble_consensus::ensemble::{detect_outliers, ConsensusConfig, ConsensusEngine, OutlierSet};
use ensemble_consensus::state::{
    ConsensusMethod, Population, PopulationMember, ProviderIdentity, ScoreVector,
};

const PROVIDER_TYPES: [&str; 4] = ["claude", "gemini", "gpt", "local"];

fn population(scores: &[f64]) -> Population {
    Population::new(
        scores
            .iter()
            .enumerate()
            .map(|(i, score)| {
                PopulationMember::new(
                    ProviderIdentity::new(format!("p{i}"), PROVIDER_TYPES[i % PROVIDER_TYPES.len()]),
                    *score,
                    ScoreVector::uniform(*score),
                    0.6 + 0.1 * (i % 4) as f64,
                )
            })
            .collect(),
    )
}

fn samples() -> Vec<Vec<f64>> {
    vec![
        vec![85.0, 82.0, 88.0],
        vec![85.0, 82.0, 88.0, 20.0],
        vec![50.0, 60.0, 70.0, 80.0, 90.0],
        vec![99.0, 1.0],
        vec![72.5],
        vec![40.0, 41.0, 39.5, 95.0, 40.5, 38.0],
    ]
}

/// Test: Contributions are normalised for every method
#[test]
fn test_contributions_sum_to_one() {
    for scores in samples() {
        for method in ConsensusMethod::ALL {
            let mut engine = ConsensusEngine::new(ConsensusConfig::default());
            let mut pop = population(&scores);
            let result = engine.consensus(&mut pop, method);

            let total: f64 = result.member_contributions.values().sum();
            assert!(
                (total - 1.0).abs() < 1e-6,
                "{} over {:?} sums to {}",
                method,
                scores,
                total
            );
            assert!(result.member_contributions.values().all(|w| *w >= 0.0));
        }
    }
}

/// Test: Scores and confidences stay within their ranges
#[test]
fn test_results_are_bounded() {
    for scores in samples() {
        for method in ConsensusMethod::ALL {
            let mut engine = ConsensusEngine::new(ConsensusConfig::default());
            let mut pop = population(&scores);
            let result = engine.consensus(&mut pop, method);

            let min = scores.iter().cloned().fold(f64::INFINITY, f64::min);
            let max = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            assert!(result.consensus_score >= min - 1e-9 && result.consensus_score <= max + 1e-9);
            assert!((0.0..=1.0).contains(&result.confidence_level));
            assert!((0.0..=1.0).contains(&result.population_agreement));
            assert!(result.consensus_uncertainty >= 0.0);
            assert!(!result.fallback);
        }
    }
}

/// Test: Unanimous populations agree fully with no uncertainty
#[test]
fn test_identical_scores_full_agreement() {
    for method in ConsensusMethod::ALL {
        let mut engine = ConsensusEngine::new(ConsensusConfig::default());
        let mut pop = population(&[77.0, 77.0, 77.0, 77.0]);
        let result = engine.consensus(&mut pop, method);

        assert!((result.consensus_score - 77.0).abs() < 1e-9, "{}", method);
        assert!((result.population_agreement - 1.0).abs() < 1e-9, "{}", method);
        assert!(result.consensus_uncertainty.abs() < 1e-9, "{}", method);
        assert!(result.outliers.is_empty());
    }
}

/// Test: A far-off member is flagged and only that member
#[test]
fn test_single_outlier_flagged() {
    let pop = population(&[85.0, 82.0, 88.0, 20.0]);
    let outliers = detect_outliers(&pop, 2.0);
    assert_eq!(outliers.count(), 1);
    assert!(outliers.contains(3));

    let mut engine = ConsensusEngine::new(ConsensusConfig::default());
    let mut pop = population(&[85.0, 82.0, 88.0, 20.0]);
    let result = engine.consensus(&mut pop, ConsensusMethod::Median);
    assert_eq!(result.outliers, vec!["local:p3".to_string()]);
    assert!((result.consensus_score - 85.0).abs() < 1e-9);
}

/// Test: Members a point or two off the pack keep their weight
#[test]
fn test_near_identical_members_not_excluded() {
    for scores in [vec![80.0, 80.0, 80.0, 81.0], vec![84.0, 85.0, 86.0, 85.0, 89.0]] {
        let mut engine = ConsensusEngine::new(ConsensusConfig::default());
        let mut pop = population(&scores);
        let result = engine.consensus(&mut pop, ConsensusMethod::WeightedAverage);
        assert!(result.outliers.is_empty(), "{:?}", scores);
        assert_eq!(result.member_contributions.len(), scores.len());
    }
}

/// Test: Two members are too few to call an outlier
#[test]
fn test_two_members_never_outliers() {
    let pop = population(&[99.0, 1.0]);
    assert!(detect_outliers(&pop, 2.0).is_empty());

    let mut engine = ConsensusEngine::new(ConsensusConfig::default());
    let mut pop = population(&[99.0, 1.0]);
    let result = engine.consensus(&mut pop, ConsensusMethod::OutlierResistant);
    assert!(result.outliers.is_empty());
}

/// Test: Median ignores how extreme the upper member is
#[test]
fn test_median_invariant_to_extremes() {
    let mut engine = ConsensusEngine::new(ConsensusConfig::default());
    let mut near = population(&[70.0, 80.0, 90.0]);
    let mut far = population(&[70.0, 80.0, 100.0]);

    let a = engine.consensus(&mut near, ConsensusMethod::Median);
    let b = engine.consensus(&mut far, ConsensusMethod::Median);
    assert_eq!(a.consensus_score, 80.0);
    assert_eq!(b.consensus_score, 80.0);
}

/// Test: Moving the outlier further out leaves the median alone but not the mean
#[test]
fn test_median_ignores_outlier_distance() {
    let near = population(&[85.0, 82.0, 88.0, 20.0]);
    let far = population(&[85.0, 82.0, 88.0, 5.0]);

    let mut engine = ConsensusEngine::new(ConsensusConfig::default());
    let a = engine.consensus(&mut near.clone(), ConsensusMethod::Median);
    let b = engine.consensus(&mut far.clone(), ConsensusMethod::Median);
    assert_eq!(a.consensus_score, b.consensus_score);

    let a = methods::weighted_average(&near, &OutlierSet::none(near.len()));
    let b = methods::weighted_average(&far, &OutlierSet::none(far.len()));
    assert!(b.consensus_score < a.consensus_score);
}

/// Test: Member order does not change the decision
#[test]
fn test_order_independent_score() {
    for method in ConsensusMethod::ALL {
        let mut forward = population(&[60.0, 75.0, 90.0]);
        let mut reversed = Population::new(forward.members().iter().rev().cloned().collect());

        let a = ConsensusEngine::new(ConsensusConfig::default()).consensus(&mut forward, method);
        let b = ConsensusEngine::new(ConsensusConfig::default()).consensus(&mut reversed, method);
        assert!((a.consensus_score - b.consensus_score).abs() < 1e-9, "{}", method);
    }
}

/// Test: Empty populations produce the structurally valid fallback
#[test]
fn test_empty_population_fallback() {
    let mut engine = ConsensusEngine::new(ConsensusConfig::default());
    let result = engine.consensus(&mut Population::new(Vec::new()), ConsensusMethod::BayesianFusion);

    assert!(result.fallback);
    assert_eq!(result.consensus_score, 70.0);
    assert!(result.confidence_level <= 0.3);
    assert!(result.member_contributions.is_empty());
    assert!(engine.history().is_empty());
}
