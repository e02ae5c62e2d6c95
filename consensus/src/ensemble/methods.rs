//! Aggregation methods
//!
//! Each method is a pure function of the population (with derived member
//! fields already refreshed) and the outlier set. Methods never touch engine
//! state; [`aggregate`] dispatches over the closed [`ConsensusMethod`] enum.
//!
//! Shared guarantees:
//! - contributions sum to 1 over the members the method includes
//! - `population_agreement` is clamped to [0, 1]
//! - identical member scores give agreement 1 and uncertainty 0

use std::collections::BTreeMap;

use super::diversity;
use super::outliers::OutlierSet;
use super::stats;
use crate::state::{ConsensusMethod, ConsensusResult, Population, PopulationDynamics, PopulationMember, ProviderKey};

/// Signature shared by every aggregation method
pub type MethodFn = fn(&Population, &OutlierSet) -> ConsensusResult;

/// Confidence reported when weights collapse to zero
const DEGENERATE_CONFIDENCE: f64 = 0.3;

/// Floor for MAD-derived confidence
const MAD_CONFIDENCE_FLOOR: f64 = 0.3;

/// Fraction trimmed from each tail by the outlier-resistant method
const WINSOR_LIMIT: f64 = 0.1;

/// Members whose weight is forced to zero in diversity-weighted consensus
/// must be outliers below this confidence
const LOW_CONFIDENCE: f64 = 0.5;

/// Minimum weight of every other member in diversity-weighted consensus
const MIN_MEMBER_WEIGHT: f64 = 0.1;

/// Look up the function implementing a method
pub fn method_fn(method: ConsensusMethod) -> MethodFn {
    match method {
        ConsensusMethod::WeightedAverage => weighted_average,
        ConsensusMethod::Median => median,
        ConsensusMethod::BayesianFusion => bayesian_fusion,
        ConsensusMethod::OutlierResistant => outlier_resistant,
        ConsensusMethod::DiversityWeighted => diversity_weighted,
    }
}

/// Run one method over a non-empty population
pub fn aggregate(method: ConsensusMethod, population: &Population, outliers: &OutlierSet) -> ConsensusResult {
    method_fn(method)(population, outliers)
}

/// Intermediate output shared by all methods
struct Aggregate {
    score: f64,
    confidence: f64,
    agreement: f64,
    uncertainty: f64,
    diversity_impact: f64,
    recommendation_strength: f64,
    contributions: BTreeMap<ProviderKey, f64>,
    reasoning: String,
}

impl Aggregate {
    fn into_result(self, method: ConsensusMethod, population: &Population, outliers: &OutlierSet) -> ConsensusResult {
        ConsensusResult {
            consensus_score: self.score,
            method,
            confidence_level: self.confidence.clamp(0.0, 1.0),
            population_agreement: self.agreement.clamp(0.0, 1.0),
            outliers: outliers.keys(population),
            diversity_impact: self.diversity_impact,
            member_contributions: self.contributions,
            consensus_uncertainty: self.uncertainty.max(0.0),
            recommendation_strength: self.recommendation_strength,
            reasoning: self.reasoning,
            dynamics: PopulationDynamics::default(),
            fallback: false,
        }
    }
}

/// Non-outlier members, or everyone when all are outliers
fn included<'a>(population: &'a Population, outliers: &OutlierSet) -> Vec<&'a PopulationMember> {
    let kept: Vec<&PopulationMember> = population
        .iter()
        .enumerate()
        .filter(|(i, _)| !outliers.contains(*i))
        .map(|(_, m)| m)
        .collect();
    if kept.is_empty() {
        population.iter().collect()
    } else {
        kept
    }
}

/// Contribution map from normalised weights; duplicate identities accumulate
fn contributions(members: &[&PopulationMember], weights: &[f64]) -> BTreeMap<ProviderKey, f64> {
    let mut map = BTreeMap::new();
    for (member, weight) in members.iter().zip(weights) {
        *map.entry(member.key()).or_insert(0.0) += weight;
    }
    map
}

fn equal_weights(n: usize) -> Vec<f64> {
    vec![1.0 / n as f64; n]
}

fn normalize(weights: &[f64]) -> Option<Vec<f64>> {
    let total: f64 = weights.iter().sum();
    (total > 0.0).then(|| weights.iter().map(|w| w / total).collect())
}

fn scores_of(members: &[&PopulationMember]) -> Vec<f64> {
    members.iter().map(|m| m.weighted_score).collect()
}

/// Confidence- and reliability-weighted mean of non-outliers
pub fn weighted_average(population: &Population, outliers: &OutlierSet) -> ConsensusResult {
    let members = included(population, outliers);
    let scores = scores_of(&members);
    let raw: Vec<f64> = members.iter().map(|m| m.confidence * m.reliability_score).collect();

    let (weights, confidence) = match normalize(&raw) {
        Some(weights) => {
            let confidence = stats::mean(&members.iter().map(|m| m.confidence).collect::<Vec<_>>());
            (weights, confidence)
        }
        None => (equal_weights(members.len()), DEGENERATE_CONFIDENCE),
    };

    let score: f64 = scores.iter().zip(&weights).map(|(s, w)| s * w).sum();
    let spread = stats::std_dev(&scores);

    Aggregate {
        score,
        confidence,
        agreement: 1.0 - spread / 100.0,
        uncertainty: spread,
        diversity_impact: 0.0,
        recommendation_strength: confidence,
        contributions: contributions(&members, &weights),
        reasoning: format!(
            "Weighted average of {} members ({} outliers excluded)",
            members.len(),
            population.len() - members.len()
        ),
    }
    .into_result(ConsensusMethod::WeightedAverage, population, outliers)
}

/// Median of non-outliers, confidence from MAD
pub fn median(population: &Population, outliers: &OutlierSet) -> ConsensusResult {
    let members = included(population, outliers);
    let scores = scores_of(&members);
    let score = stats::median(&scores);
    let mad = stats::mad(&scores);
    let confidence = (1.0 - mad / 50.0).max(MAD_CONFIDENCE_FLOOR);

    Aggregate {
        score,
        confidence,
        agreement: 1.0 - mad / 100.0,
        uncertainty: mad,
        diversity_impact: 0.0,
        recommendation_strength: confidence,
        contributions: contributions(&members, &equal_weights(members.len())),
        reasoning: format!("Median consensus from {} members (MAD {:.2})", members.len(), mad),
    }
    .into_result(ConsensusMethod::Median, population, outliers)
}

/// Precision-weighted fusion of Gaussian beliefs
pub fn bayesian_fusion(population: &Population, outliers: &OutlierSet) -> ConsensusResult {
    let members = included(population, outliers);
    let scores = scores_of(&members);
    let precisions: Vec<f64> = members.iter().map(|m| (m.confidence * 10.0).max(0.1)).collect();
    let total_precision: f64 = precisions.iter().sum();

    let score = stats::weighted_mean(&scores, &precisions).unwrap_or_else(|| stats::mean(&scores));
    let posterior_std = (1.0 / total_precision).sqrt();
    let dispersion = stats::weighted_variance(&scores, &precisions, score).sqrt();
    let confidence = (total_precision / (total_precision + 1.0)).min(0.99);
    let weights: Vec<f64> = precisions.iter().map(|p| p / total_precision).collect();

    Aggregate {
        score,
        confidence,
        agreement: 1.0 - (dispersion / 50.0).min(1.0),
        uncertainty: dispersion,
        diversity_impact: 0.0,
        recommendation_strength: confidence,
        contributions: contributions(&members, &weights),
        reasoning: format!(
            "Bayesian fusion of {} beliefs (total precision {:.2}, posterior std {:.3})",
            members.len(),
            total_precision,
            posterior_std
        ),
    }
    .into_result(ConsensusMethod::BayesianFusion, population, outliers)
}

/// Winsorized mean over everyone; outliers are dampened, not dropped
pub fn outlier_resistant(population: &Population, outliers: &OutlierSet) -> ConsensusResult {
    let members: Vec<&PopulationMember> = population.iter().collect();
    let scores = scores_of(&members);
    let score = stats::winsorized_mean(&scores, WINSOR_LIMIT);
    let mad = stats::mad(&scores);
    let confidence = (1.0 - mad / 50.0).max(MAD_CONFIDENCE_FLOOR);

    Aggregate {
        score,
        confidence,
        agreement: 1.0 - mad / 100.0,
        uncertainty: mad,
        diversity_impact: 0.1,
        recommendation_strength: confidence,
        contributions: contributions(&members, &equal_weights(members.len())),
        reasoning: format!(
            "Outlier-resistant consensus using a {:.0}% winsorized mean over {} members",
            WINSOR_LIMIT * 100.0,
            members.len()
        ),
    }
    .into_result(ConsensusMethod::OutlierResistant, population, outliers)
}

/// Member weight used by diversity-weighted consensus.
///
/// Only a member that is both an outlier and low-confidence is dropped; a
/// confident outlier keeps its full blended weight.
pub fn diversity_member_weight(member: &PopulationMember, is_outlier: bool) -> f64 {
    if is_outlier && member.confidence < LOW_CONFIDENCE {
        return 0.0;
    }
    let base = 0.4 * member.confidence
        + 0.3 * member.reliability_score
        + 0.2 * member.expertise_weight
        + 0.1 * member.diversity_score;
    base.max(MIN_MEMBER_WEIGHT)
}

/// Blend of confidence, reliability, expertise and diversity
pub fn diversity_weighted(population: &Population, outliers: &OutlierSet) -> ConsensusResult {
    let members: Vec<&PopulationMember> = population.iter().collect();
    let scores = scores_of(&members);
    let raw: Vec<f64> = members
        .iter()
        .enumerate()
        .map(|(i, m)| diversity_member_weight(m, outliers.contains(i)))
        .collect();
    let weights = normalize(&raw).unwrap_or_else(|| equal_weights(members.len()));

    let score: f64 = scores.iter().zip(&weights).map(|(s, w)| s * w).sum();
    let variance = stats::weighted_variance(&scores, &weights, score);
    let index = diversity::diversity_index(population);
    let agreement = 1.0 - (variance / 1000.0).min(1.0);
    let confidence = (agreement * (1.0 + index * 0.2)).min(0.95);

    Aggregate {
        score,
        confidence,
        agreement,
        uncertainty: variance.sqrt(),
        diversity_impact: index,
        recommendation_strength: confidence * (1.0 + index * 0.1),
        contributions: contributions(&members, &weights),
        reasoning: format!(
            "Diversity-weighted consensus from {} members (diversity index {:.2})",
            members.len(),
            index
        ),
    }
    .into_result(ConsensusMethod::DiversityWeighted, population, outliers)
}
