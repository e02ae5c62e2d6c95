//! Outlier detection over member weighted scores
//!
//! The classical z-score of any point in a sample of `n` is bounded by
//! `sqrt(n - 1)`, so on its own it can never exceed 2.0 for populations of
//! five or fewer. Each member is also scored with the modified z-score
//! (median/MAD based), which has its own cutoff of at least
//! [`ROBUST_CUTOFF`]. A member is flagged when either score crosses its
//! cutoff. The modified z-score is undefined when MAD is zero, leaving the
//! classical test alone.

use tracing::info;

use super::stats;
use crate::state::{Population, ProviderKey};

/// Minimum population size for outlier detection
pub const MIN_MEMBERS: usize = 3;

/// Consistency constant relating MAD to the standard deviation
const MAD_SCALE: f64 = 0.6745;

/// Conventional cutoff for the modified z-score
pub const ROBUST_CUTOFF: f64 = 3.5;

/// Slack for scores that land on the cutoff up to rounding
const Z_EPSILON: f64 = 1e-9;

/// Per-member outlier flags, aligned with population order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutlierSet {
    flags: Vec<bool>,
}

impl OutlierSet {
    /// No member flagged
    pub fn none(len: usize) -> Self {
        Self {
            flags: vec![false; len],
        }
    }

    pub fn from_flags(flags: Vec<bool>) -> Self {
        Self { flags }
    }

    pub fn contains(&self, index: usize) -> bool {
        self.flags.get(index).copied().unwrap_or(false)
    }

    pub fn count(&self) -> usize {
        self.flags.iter().filter(|f| **f).count()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Identity keys of flagged members, first-seen order, deduplicated
    pub fn keys(&self, population: &Population) -> Vec<ProviderKey> {
        let mut keys: Vec<ProviderKey> = Vec::new();
        for (index, member) in population.iter().enumerate() {
            let key = member.key();
            if self.contains(index) && !keys.contains(&key) {
                keys.push(key);
            }
        }
        keys
    }
}

/// Classical and modified z-score of every value
///
/// The modified score is `None` when MAD is zero.
pub fn z_scores(values: &[f64]) -> Vec<(f64, Option<f64>)> {
    let mean = stats::mean(values);
    let std = stats::std_dev(values);
    let median = stats::median(values);
    let mad = stats::mad(values);

    values
        .iter()
        .map(|v| {
            let classical = if std > 0.0 { (v - mean).abs() / std } else { 0.0 };
            let robust = (mad > 0.0).then(|| MAD_SCALE * (v - median).abs() / mad);
            (classical, robust)
        })
        .collect()
}

/// Flag members whose score deviates more than `threshold` standard units
pub fn detect_outliers(population: &Population, threshold: f64) -> OutlierSet {
    if population.len() < MIN_MEMBERS {
        return OutlierSet::none(population.len());
    }
    let scores = population.scores();
    if stats::std_dev(&scores) == 0.0 {
        return OutlierSet::none(population.len());
    }

    let robust_cutoff = threshold.max(ROBUST_CUTOFF);
    let flags = z_scores(&scores)
        .into_iter()
        .zip(population.iter())
        .map(|((classical, robust), member)| {
            let flagged = classical > threshold + Z_EPSILON
                || robust.is_some_and(|z| z > robust_cutoff + Z_EPSILON);
            if flagged {
                info!(
                    provider = %member.identity,
                    score = member.weighted_score,
                    z_score = classical,
                    modified_z_score = robust,
                    "Outlier detected"
                );
            }
            flagged
        })
        .collect();

    OutlierSet::from_flags(flags)
}
