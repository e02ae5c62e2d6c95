//! Request context and context-aware threshold nudges

use serde::{Deserialize, Serialize};

use crate::oracle::ValidationRequest;
use crate::state::DecisionThresholds;

/// Normalised [0, 1] features of a request's situation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptationContext {
    pub tool_complexity: f64,
    pub user_expertise: f64,
    pub project_criticality: f64,
    pub time_pressure: f64,
    /// Historical success rate in similar contexts
    pub past_success_rate: f64,
}

impl Default for AdaptationContext {
    fn default() -> Self {
        Self {
            tool_complexity: 0.5,
            user_expertise: 0.6,
            project_criticality: 0.5,
            time_pressure: 0.4,
            past_success_rate: 0.5,
        }
    }
}

pub const APPROVED_BOUNDS: (f64, f64) = (70.0, 90.0);
pub const NEEDS_REVISION_BOUNDS: (f64, f64) = (50.0, 80.0);
pub const CONFIDENCE_BOUNDS: (f64, f64) = (0.5, 0.9);

impl AdaptationContext {
    /// Copy with every feature clamped to [0, 1]; NaN becomes 0
    pub fn normalized(&self) -> Self {
        let unit = |v: f64| if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) };
        Self {
            tool_complexity: unit(self.tool_complexity),
            user_expertise: unit(self.user_expertise),
            project_criticality: unit(self.project_criticality),
            time_pressure: unit(self.time_pressure),
            past_success_rate: unit(self.past_success_rate),
        }
    }

    /// Nudge base thresholds for this context and clamp to safe bounds.
    ///
    /// The base thresholds are not modified.
    pub fn adjust(&self, base: DecisionThresholds) -> DecisionThresholds {
        let ctx = self.normalized();
        let mut approved = base.approved;
        let mut needs_revision = base.needs_revision;
        let mut confidence = base.confidence_minimum;

        if ctx.tool_complexity > 0.8 {
            approved += 5.0;
            confidence += 0.1;
        }
        if ctx.user_expertise < 0.3 {
            approved += 3.0;
            needs_revision += 2.0;
        }
        if ctx.project_criticality > 0.8 {
            approved += 4.0;
            confidence += 0.05;
        }
        if ctx.time_pressure > 0.8 {
            approved -= 2.0;
            needs_revision -= 1.0;
        }
        if ctx.past_success_rate > 0.85 {
            approved -= 1.0;
        }

        DecisionThresholds {
            approved: approved.clamp(APPROVED_BOUNDS.0, APPROVED_BOUNDS.1),
            needs_revision: needs_revision.clamp(NEEDS_REVISION_BOUNDS.0, NEEDS_REVISION_BOUNDS.1),
            confidence_minimum: confidence.clamp(CONFIDENCE_BOUNDS.0, CONFIDENCE_BOUNDS.1),
        }
    }
}

/// Base complexity of an operation, matched on its lowercase name
fn operation_complexity(operation: &str) -> f64 {
    let op = operation.to_lowercase();
    if op.contains("bash") || op.contains("shell") {
        0.8
    } else if op.contains("git") {
        0.7
    } else if op.contains("write") || op.contains("edit") {
        0.6
    } else if op.contains("search") || op.contains("grep") {
        0.5
    } else if op.contains("read") {
        0.3
    } else {
        0.5
    }
}

fn metadata_value(request: &ValidationRequest, key: &str, default: f64) -> f64 {
    request
        .metadata
        .get(key)
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .map(|v| v.clamp(0.0, 1.0))
        .unwrap_or(default)
}

/// Estimate a context from the request itself.
///
/// Complexity grows with payload length (+0.1 per 100 bytes, capped at 1).
/// Metadata keys `user_expertise`, `project_criticality` and `time_pressure`
/// override the defaults.
pub fn estimate_context(request: &ValidationRequest, past_success_rate: f64) -> AdaptationContext {
    let defaults = AdaptationContext::default();
    let length_factor = request.payload.len() as f64 / 1000.0;
    AdaptationContext {
        tool_complexity: (operation_complexity(&request.operation) + length_factor).min(1.0),
        user_expertise: metadata_value(request, "user_expertise", defaults.user_expertise),
        project_criticality: metadata_value(request, "project_criticality", defaults.project_criticality),
        time_pressure: metadata_value(request, "time_pressure", defaults.time_pressure),
        past_success_rate: past_success_rate.clamp(0.0, 1.0),
    }
}
