//! Adaptive threshold learner
//!
//! Keeps a capped outcome history and periodically re-derives the approval
//! threshold from the most recent window. Updates are smoothed towards the
//! optimum rather than jumping to it, and a window with a single class
//! leaves the current config in place.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::context::AdaptationContext;
use super::metrics::{self, RocCurve};
use super::report::{self, PerformanceReport};
use crate::state::{DecisionThresholds, ThresholdConfig, ValidationOutcome};

/// Candidate thresholds are clamped to this range before smoothing
pub const CANDIDATE_BOUNDS: (f64, f64) = (60.0, 90.0);
/// Learned approval threshold bounds
pub const APPROVED_BOUNDS: (f64, f64) = (70.0, 90.0);
/// Learned needs-revision threshold bounds
pub const NEEDS_REVISION_BOUNDS: (f64, f64) = (50.0, 80.0);
/// Gap between the approval and needs-revision lines
pub const REVISION_GAP: f64 = 20.0;

/// How the candidate threshold is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdStrategy {
    /// Maximise F1 over a discretised sweep
    #[default]
    F1Sweep,
    /// Maximise Youden's J on the ROC curve
    Youden,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearnerConfig {
    pub learning_rate: f64,
    /// Outcomes considered per learning cycle
    pub window: usize,
    pub min_samples: usize,
    pub recompute_every: usize,
    pub history_cap: usize,
    pub strategy: ThresholdStrategy,
    pub sweep_min: f64,
    pub sweep_max: f64,
    pub sweep_step: f64,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            window: 100,
            min_samples: 20,
            recompute_every: 10,
            history_cap: 1000,
            strategy: ThresholdStrategy::F1Sweep,
            sweep_min: 60.0,
            sweep_max: 90.0,
            sweep_step: 2.0,
        }
    }
}

/// Whether a learning cycle is due after `recorded` outcomes
pub fn should_recompute(recorded: usize, config: &LearnerConfig) -> bool {
    recorded >= config.min_samples && config.recompute_every > 0 && recorded % config.recompute_every == 0
}

/// What recording an outcome did to the thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningCycle {
    NotDue,
    Skipped { reason: String },
    Updated { previous: ThresholdConfig, current: ThresholdConfig },
}

impl LearningCycle {
    pub fn is_updated(&self) -> bool {
        matches!(self, Self::Updated { .. })
    }
}

/// Owns the live threshold config and the outcome history
#[derive(Debug, Clone)]
pub struct ThresholdLearner {
    config: LearnerConfig,
    base: ThresholdConfig,
    history: Vec<ValidationOutcome>,
    /// Outcomes seen, including evicted ones; drives the recompute trigger
    recorded: usize,
}

impl ThresholdLearner {
    pub fn new(config: LearnerConfig, base: ThresholdConfig, mut history: Vec<ValidationOutcome>) -> Self {
        let excess = history.len().saturating_sub(config.history_cap);
        history.drain(..excess);
        let recorded = history.len();
        Self {
            config,
            base,
            history,
            recorded,
        }
    }

    pub fn config(&self) -> &LearnerConfig {
        &self.config
    }

    /// The learned, context-free thresholds
    pub fn base_config(&self) -> &ThresholdConfig {
        &self.base
    }

    pub fn history(&self) -> &[ValidationOutcome] {
        &self.history
    }

    /// Thresholds for the next decision in the given context
    pub fn thresholds(&self, context: &AdaptationContext) -> DecisionThresholds {
        context.adjust(self.base.thresholds())
    }

    /// Success rate of the current window, `None` without history
    pub fn recent_success_rate(&self) -> Option<f64> {
        let window = self.window();
        if window.is_empty() {
            return None;
        }
        let successes = window.iter().filter(|o| o.actual_success).count();
        Some(successes as f64 / window.len() as f64)
    }

    fn window(&self) -> &[ValidationOutcome] {
        let start = self.history.len().saturating_sub(self.config.window);
        &self.history[start..]
    }

    /// Append an outcome and run a learning cycle when one is due
    pub fn record_outcome(&mut self, outcome: ValidationOutcome) -> LearningCycle {
        debug!(
            request_id = %outcome.request_id,
            score = outcome.predicted_score,
            success = outcome.actual_success,
            "Outcome recorded"
        );
        self.history.push(outcome);
        let excess = self.history.len().saturating_sub(self.config.history_cap);
        self.history.drain(..excess);
        self.recorded += 1;

        if should_recompute(self.recorded, &self.config) {
            self.recompute()
        } else {
            LearningCycle::NotDue
        }
    }

    /// Run one learning cycle over the current window
    pub fn recompute(&mut self) -> LearningCycle {
        let window = self.window();
        if window.is_empty() {
            return self.skip("no outcomes recorded");
        }
        if !metrics::has_both_classes(window) {
            return self.skip("window contains a single outcome class");
        }

        let current_metrics = metrics::confusion_metrics(window);
        let sweep = metrics::f1_sweep(
            window,
            self.config.sweep_min,
            self.config.sweep_max,
            self.config.sweep_step,
        );
        let roc: Option<RocCurve> = metrics::roc_curve(window);

        let candidate = match self.config.strategy {
            ThresholdStrategy::F1Sweep => sweep.as_ref().map(|s| s.threshold),
            ThresholdStrategy::Youden => roc
                .as_ref()
                .and_then(RocCurve::youden_threshold)
                .or_else(|| sweep.as_ref().map(|s| s.threshold)),
        };
        let Some(candidate) = candidate else {
            return self.skip("no candidate threshold found");
        };
        let candidate = candidate.clamp(CANDIDATE_BOUNDS.0, CANDIDATE_BOUNDS.1);

        let previous = self.base.clone();
        let lr = self.config.learning_rate;
        let approved = (previous.approved_threshold + lr * (candidate - previous.approved_threshold))
            .clamp(APPROVED_BOUNDS.0, APPROVED_BOUNDS.1);
        let needs_revision = (approved - REVISION_GAP).clamp(NEEDS_REVISION_BOUNDS.0, NEEDS_REVISION_BOUNDS.1);

        let current = ThresholdConfig {
            approved_threshold: approved,
            needs_revision_threshold: needs_revision,
            confidence_minimum: previous.confidence_minimum,
            metrics: current_metrics,
            optimized_f1: sweep.map(|s| s.f1),
            roc_auc: roc.map(|r| r.auc),
            cycles: previous.cycles + 1,
            last_updated: Utc::now(),
        };

        info!(
            candidate,
            previous = previous.approved_threshold,
            approved = current.approved_threshold,
            needs_revision = current.needs_revision_threshold,
            f1 = current.metrics.f1_score,
            "Thresholds updated"
        );

        self.base = current.clone();
        LearningCycle::Updated { previous, current }
    }

    fn skip(&self, reason: &str) -> LearningCycle {
        warn!(reason, outcomes = self.history.len(), "Threshold learning cycle skipped");
        LearningCycle::Skipped {
            reason: reason.to_string(),
        }
    }

    /// Advisory performance report over the whole history
    pub fn performance_report(&self) -> PerformanceReport {
        report::performance_report(&self.base, &self.history, self.config.window)
    }
}
