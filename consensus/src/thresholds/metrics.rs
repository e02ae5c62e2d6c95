//! Classification metrics over validation outcomes
//!
//! "Predicted approved" is the positive class throughout. The sweep and the
//! ROC curve re-classify outcomes by `predicted_score >= threshold` instead
//! of using the recorded status.

use serde::{Deserialize, Serialize};

use crate::state::{PerformanceMetrics, ValidationOutcome, ValidationStatus};

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Confusion-matrix metrics for an arbitrary positive-prediction rule
fn metrics_by<F>(outcomes: &[ValidationOutcome], predicted_positive: F) -> PerformanceMetrics
where
    F: Fn(&ValidationOutcome) -> bool,
{
    let mut metrics = PerformanceMetrics {
        total: outcomes.len(),
        ..Default::default()
    };
    for outcome in outcomes {
        match (predicted_positive(outcome), outcome.actual_success) {
            (true, true) => metrics.true_positives += 1,
            (true, false) => metrics.false_positives += 1,
            (false, false) => metrics.true_negatives += 1,
            (false, true) => metrics.false_negatives += 1,
        }
    }

    let tp = metrics.true_positives;
    let fp = metrics.false_positives;
    let tn = metrics.true_negatives;
    let fn_ = metrics.false_negatives;

    metrics.precision = ratio(tp, tp + fp);
    metrics.recall = ratio(tp, tp + fn_);
    metrics.accuracy = ratio(tp + tn, metrics.total);
    metrics.f1_score = if metrics.precision + metrics.recall > 0.0 {
        2.0 * metrics.precision * metrics.recall / (metrics.precision + metrics.recall)
    } else {
        0.0
    };
    metrics.approved_success_rate = ratio(tp, tp + fp);
    metrics
}

/// Metrics of the decisions as they were actually made
pub fn confusion_metrics(outcomes: &[ValidationOutcome]) -> PerformanceMetrics {
    metrics_by(outcomes, |o| o.predicted_status == ValidationStatus::Approved)
}

/// Metrics if `threshold` had been the approval line
pub fn metrics_at(outcomes: &[ValidationOutcome], threshold: f64) -> PerformanceMetrics {
    metrics_by(outcomes, |o| o.predicted_score >= threshold)
}

/// Both classes present
pub fn has_both_classes(outcomes: &[ValidationOutcome]) -> bool {
    outcomes.iter().any(|o| o.actual_success) && outcomes.iter().any(|o| !o.actual_success)
}

/// Best threshold of a discretised sweep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepResult {
    pub threshold: f64,
    pub f1: f64,
    pub metrics: PerformanceMetrics,
}

/// Scan `min..=max` in `step` increments for the F1-maximising threshold.
///
/// Ties keep the first (lowest) threshold. `None` for empty input or a
/// non-positive step.
pub fn f1_sweep(outcomes: &[ValidationOutcome], min: f64, max: f64, step: f64) -> Option<SweepResult> {
    if outcomes.is_empty() || step <= 0.0 || max < min {
        return None;
    }

    let steps = ((max - min) / step).floor() as usize;
    let mut best: Option<SweepResult> = None;
    for i in 0..=steps {
        let threshold = min + step * i as f64;
        let metrics = metrics_at(outcomes, threshold);
        let f1 = metrics.f1_score;
        if best.as_ref().map_or(true, |b| f1 > b.f1) {
            best = Some(SweepResult { threshold, f1, metrics });
        }
    }
    best
}

/// One operating point of a ROC curve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RocPoint {
    pub threshold: f64,
    pub tpr: f64,
    pub fpr: f64,
}

/// ROC curve over the distinct predicted scores
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RocCurve {
    /// Ordered by descending threshold, from (0, 0) towards (1, 1)
    pub points: Vec<RocPoint>,
    pub auc: f64,
}

impl RocCurve {
    /// Threshold maximising Youden's J = TPR - FPR (first on ties)
    pub fn youden_threshold(&self) -> Option<f64> {
        let mut best: Option<(f64, f64)> = None;
        for point in &self.points {
            let j = point.tpr - point.fpr;
            if best.map_or(true, |(_, best_j)| j > best_j) {
                best = Some((point.threshold, j));
            }
        }
        best.map(|(threshold, _)| threshold)
    }
}

/// Build the ROC curve; `None` unless both classes are present
pub fn roc_curve(outcomes: &[ValidationOutcome]) -> Option<RocCurve> {
    if !has_both_classes(outcomes) {
        return None;
    }

    let positives = outcomes.iter().filter(|o| o.actual_success).count();
    let negatives = outcomes.len() - positives;

    let mut thresholds: Vec<f64> = outcomes
        .iter()
        .map(|o| o.predicted_score)
        .filter(|s| s.is_finite())
        .collect();
    thresholds.sort_by(|a, b| b.total_cmp(a));
    thresholds.dedup();

    let points: Vec<RocPoint> = thresholds
        .into_iter()
        .map(|threshold| {
            let metrics = metrics_at(outcomes, threshold);
            RocPoint {
                threshold,
                tpr: ratio(metrics.true_positives, positives),
                fpr: ratio(metrics.false_positives, negatives),
            }
        })
        .collect();

    let mut auc = 0.0;
    let (mut prev_fpr, mut prev_tpr) = (0.0, 0.0);
    for point in &points {
        auc += (point.fpr - prev_fpr) * (point.tpr + prev_tpr) / 2.0;
        prev_fpr = point.fpr;
        prev_tpr = point.tpr;
    }
    auc += (1.0 - prev_fpr) * (1.0 + prev_tpr) / 2.0;

    Some(RocCurve {
        points,
        auc: auc.clamp(0.0, 1.0),
    })
}
