//! Advisory performance reporting for the threshold learner

use serde::{Deserialize, Serialize};

use super::metrics;
use crate::state::{DecisionThresholds, PerformanceMetrics, ThresholdConfig, Trend, ValidationOutcome};

/// Outcomes per trend window
pub const TREND_WINDOW: usize = 20;
/// Outcomes required before trends are reported
pub const TREND_MIN_OUTCOMES: usize = 50;
const TREND_MIN_WINDOWS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendAnalysis {
    pub window_size: usize,
    /// Metrics per consecutive window, oldest first; the last may be partial
    pub windows: Vec<PerformanceMetrics>,
    pub accuracy: Trend,
    pub precision: Trend,
    pub recall: Trend,
    pub f1_score: Trend,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub total_outcomes: usize,
    pub overall: PerformanceMetrics,
    /// Metrics of the learner's current window
    pub recent: PerformanceMetrics,
    pub thresholds: DecisionThresholds,
    pub learning_cycles: u64,
    pub optimized_f1: Option<f64>,
    pub roc_auc: Option<f64>,
    pub trends: Option<TrendAnalysis>,
    pub recommendations: Vec<String>,
}

pub fn trend_analysis(history: &[ValidationOutcome]) -> Option<TrendAnalysis> {
    if history.len() < TREND_MIN_OUTCOMES {
        return None;
    }
    let windows: Vec<PerformanceMetrics> = history
        .chunks(TREND_WINDOW)
        .map(metrics::confusion_metrics)
        .collect();
    if windows.len() < TREND_MIN_WINDOWS {
        return None;
    }
    let (first, last) = (windows.first()?, windows.last()?);
    Some(TrendAnalysis {
        window_size: TREND_WINDOW,
        accuracy: Trend::between(first.accuracy, last.accuracy, true),
        precision: Trend::between(first.precision, last.precision, true),
        recall: Trend::between(first.recall, last.recall, true),
        f1_score: Trend::between(first.f1_score, last.f1_score, true),
        windows,
    })
}

fn recommendations(recent: &PerformanceMetrics, trends: Option<&TrendAnalysis>) -> Vec<String> {
    if recent.total == 0 {
        return vec!["No outcomes recorded yet; thresholds are at their defaults".to_string()];
    }

    let mut out = Vec::new();
    if recent.accuracy < 0.7 {
        out.push(format!(
            "Accuracy is low ({:.2}); collect more feedback before trusting learned thresholds",
            recent.accuracy
        ));
    }
    if recent.precision < 0.6 {
        out.push(format!(
            "Precision is low ({:.2}); the approval threshold is too permissive",
            recent.precision
        ));
    }
    if recent.recall < 0.6 {
        out.push(format!(
            "Recall is low ({:.2}); the approval threshold is too restrictive",
            recent.recall
        ));
    }
    if trends.map_or(false, |t| t.accuracy == Trend::Declining) {
        out.push("Accuracy is declining; review recent provider behaviour".to_string());
    }
    if recent.approved_success_rate < 0.8 {
        out.push(format!(
            "Only {:.0}% of approved decisions succeeded; consider raising the approval threshold",
            recent.approved_success_rate * 100.0
        ));
    }
    if out.is_empty() {
        out.push("Threshold performance is stable".to_string());
    }
    out
}

/// Build a report from the live config and the outcome history
pub fn performance_report(base: &ThresholdConfig, history: &[ValidationOutcome], window: usize) -> PerformanceReport {
    let start = history.len().saturating_sub(window);
    let recent = metrics::confusion_metrics(&history[start..]);
    let trends = trend_analysis(history);
    let recommendations = recommendations(&recent, trends.as_ref());

    PerformanceReport {
        total_outcomes: history.len(),
        overall: metrics::confusion_metrics(history),
        recent,
        thresholds: base.thresholds(),
        learning_cycles: base.cycles,
        optimized_f1: base.optimized_f1,
        roc_auc: base.roc_auc,
        trends,
        recommendations,
    }
}
