//! Diversity scoring
//!
//! Member diversity is the mean Euclidean distance of a member's feature
//! vector to every other member, normalised by the largest such mean. The
//! population index mixes provider-type entropy with score dispersion.

use std::collections::{BTreeMap, BTreeSet};

use super::stats;
use crate::state::{Population, PopulationMember};

/// Diversity assigned when there is nothing to compare against
pub const NEUTRAL_DIVERSITY: f64 = 0.5;

const ENTROPY_WEIGHT: f64 = 0.7;
const DISPERSION_WEIGHT: f64 = 0.3;

/// Stable [0, 1) fingerprint of a provider type
pub fn provider_type_fingerprint(provider_type: &str) -> f64 {
    (stats::fnv1a(provider_type.to_lowercase().as_bytes()) % 100) as f64 / 100.0
}

/// Feature vector of one member over the given dimension names
fn features(member: &PopulationMember, dimensions: &[String]) -> Vec<f64> {
    let mut features = Vec::with_capacity(dimensions.len() + 4);
    features.push(member.weighted_score);
    features.push(member.confidence);
    features.extend(dimensions.iter().map(|d| member.scores.get(d).unwrap_or(0.0)));
    features.push(member.latency_secs());
    features.push(provider_type_fingerprint(&member.identity.provider_type));
    features
}

fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

/// Compute and store each member's `diversity_score` in [0, 1]
pub fn assign_member_diversity(population: &mut Population) {
    if population.len() < 2 {
        for member in population.members_mut() {
            member.diversity_score = NEUTRAL_DIVERSITY;
        }
        return;
    }

    let dimensions: Vec<String> = population
        .iter()
        .flat_map(|m| m.scores.dimensions().map(str::to_string))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let vectors: Vec<Vec<f64>> = population.iter().map(|m| features(m, &dimensions)).collect();

    let n = vectors.len();
    let mean_distances: Vec<f64> = (0..n)
        .map(|i| {
            let total: f64 = (0..n)
                .filter(|j| *j != i)
                .map(|j| euclidean(&vectors[i], &vectors[j]))
                .sum();
            total / (n - 1) as f64
        })
        .collect();

    let max = mean_distances.iter().copied().fold(0.0, f64::max);
    for (member, distance) in population.members_mut().iter_mut().zip(mean_distances) {
        member.diversity_score = if max > 0.0 { distance / max } else { 0.0 };
    }
}

/// Population diversity index in [0, 1]
///
/// `0.7 * normalised Shannon entropy of provider types + 0.3 * min(1, CV of scores)`,
/// 0 for fewer than two members.
pub fn diversity_index(population: &Population) -> f64 {
    if population.len() < 2 {
        return 0.0;
    }

    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for member in population {
        *counts.entry(member.identity.provider_type.as_str()).or_insert(0) += 1;
    }
    let total = population.len() as f64;
    let entropy: f64 = counts
        .values()
        .map(|c| {
            let p = *c as f64 / total;
            -p * p.ln()
        })
        .sum();
    let max_entropy = (counts.len() as f64).ln();
    let normalized_entropy = if max_entropy > 0.0 {
        entropy / max_entropy
    } else {
        0.0
    };

    let cv = stats::coefficient_of_variation(&population.scores()).min(1.0);

    (normalized_entropy * ENTROPY_WEIGHT + cv * DISPERSION_WEIGHT).clamp(0.0, 1.0)
}
