//! Small descriptive statistics used by the consensus methods
//!
//! All functions treat their input as a full population (no Bessel
//! correction) and return 0.0 for empty input instead of NaN.

use crate::state::Distribution;

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64
}

pub fn std_dev(values: &[f64]) -> f64 {
    variance(values).sqrt()
}

/// Weighted mean, `None` when the weights sum to zero
pub fn weighted_mean(values: &[f64], weights: &[f64]) -> Option<f64> {
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return None;
    }
    Some(values.iter().zip(weights).map(|(v, w)| v * w).sum::<f64>() / total)
}

/// Weighted population variance around `center`
pub fn weighted_variance(values: &[f64], weights: &[f64], center: f64) -> f64 {
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    values
        .iter()
        .zip(weights)
        .map(|(v, w)| w * (v - center).powi(2))
        .sum::<f64>()
        / total
}

fn sorted(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted
}

pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let sorted = sorted(values);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Median absolute deviation around the median (unscaled)
pub fn mad(values: &[f64]) -> f64 {
    let center = median(values);
    let deviations: Vec<f64> = values.iter().map(|v| (v - center).abs()).collect();
    median(&deviations)
}

/// Mean after clamping the lowest and highest `limit` fraction of values to
/// the nearest kept value.
///
/// The number of clamped values per side is `floor(limit * n)`.
pub fn winsorized_mean(values: &[f64], limit: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let sorted = sorted(values);
    let n = sorted.len();
    let k = ((limit.clamp(0.0, 0.5) * n as f64).floor() as usize).min((n - 1) / 2);
    let low = sorted[k];
    let high = sorted[n - 1 - k];
    mean(&sorted.iter().map(|v| v.clamp(low, high)).collect::<Vec<_>>())
}

/// Standard deviation over mean, 0 when the mean is not positive
pub fn coefficient_of_variation(values: &[f64]) -> f64 {
    let m = mean(values);
    if m <= 0.0 {
        return 0.0;
    }
    std_dev(values) / m
}

/// Least-squares slope of `values` against their index
pub fn linear_slope(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let xs: Vec<f64> = (0..n).map(|i| i as f64).collect();
    let x_mean = mean(&xs);
    let y_mean = mean(values);
    let numerator: f64 = xs
        .iter()
        .zip(values)
        .map(|(x, y)| (x - x_mean) * (y - y_mean))
        .sum();
    let denominator: f64 = xs.iter().map(|x| (x - x_mean).powi(2)).sum();
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

/// Mean/std/min/max summary, all zero for empty input
pub fn distribution(values: &[f64]) -> Distribution {
    if values.is_empty() {
        return Distribution::default();
    }
    Distribution {
        mean: mean(values),
        std: std_dev(values),
        min: values.iter().copied().fold(f64::INFINITY, f64::min),
        max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
    }
}

/// 64-bit FNV-1a hash, stable across runs and platforms
pub fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes.iter().fold(OFFSET, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(PRIME)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn test_mean_and_std() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((mean(&values) - 5.0).abs() < EPS);
        assert!((std_dev(&values) - 2.0).abs() < EPS);
        assert_eq!(mean(&[]), 0.0);
    }

    #[test]
    fn test_median_even_and_odd() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[85.0, 82.0, 88.0, 20.0]), 83.5);
    }

    #[test]
    fn test_mad() {
        // deviations from 83.5: 1.5, 1.5, 4.5, 63.5
        assert!((mad(&[85.0, 82.0, 88.0, 20.0]) - 3.0).abs() < EPS);
        assert_eq!(mad(&[70.0, 70.0, 70.0]), 0.0);
    }

    #[test]
    fn test_winsorized_mean_clamps_tails() {
        let values: Vec<f64> = (1..=10).map(|v| v as f64).collect();
        // 1 -> 2 and 10 -> 9
        assert!((winsorized_mean(&values, 0.1) - 5.5).abs() < EPS);

        let mut skewed = values.clone();
        skewed[9] = 1000.0;
        assert!((winsorized_mean(&skewed, 0.1) - 5.5).abs() < EPS);
    }

    #[test]
    fn test_winsorized_mean_small_sample_is_plain_mean() {
        let values = [10.0, 20.0, 90.0];
        assert!((winsorized_mean(&values, 0.1) - 40.0).abs() < EPS);
    }

    #[test]
    fn test_linear_slope() {
        assert!((linear_slope(&[60.0, 63.0, 66.0, 69.0, 72.0]) - 3.0).abs() < EPS);
        assert_eq!(linear_slope(&[50.0]), 0.0);
    }

    #[test]
    fn test_weighted_helpers() {
        assert_eq!(weighted_mean(&[10.0, 20.0], &[0.0, 0.0]), None);
        let m = weighted_mean(&[10.0, 20.0], &[1.0, 3.0]).unwrap();
        assert!((m - 17.5).abs() < EPS);
        assert!((weighted_variance(&[10.0, 20.0], &[1.0, 1.0], 15.0) - 25.0).abs() < EPS);
    }

    #[test]
    fn test_distribution() {
        let d = distribution(&[1.0, 3.0]);
        assert_eq!((d.mean, d.std, d.min, d.max), (2.0, 1.0, 1.0, 3.0));
        assert_eq!(distribution(&[]), Distribution::default());
    }

    #[test]
    fn test_fnv1a_known_values() {
        assert_eq!(fnv1a(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv1a(b"a"), 0xaf63_dc4c_8601_ec8c);
    }
}
