//! Adaptive decision thresholds
//!
//! Outcome feedback flows into [`ThresholdLearner`], which periodically
//! re-derives the approval line from recent history. Per-request
//! [`AdaptationContext`] nudges are applied on top of the learned base
//! without changing it.

pub mod context;
pub mod learner;
pub mod metrics;
pub mod report;

pub use context::{estimate_context, AdaptationContext};
pub use learner::{should_recompute, LearnerConfig, LearningCycle, ThresholdLearner, ThresholdStrategy};
pub use metrics::{confusion_metrics, f1_sweep, roc_curve, RocCurve, SweepResult};
pub use report::{PerformanceReport, TrendAnalysis};
