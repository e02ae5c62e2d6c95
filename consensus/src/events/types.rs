//! Events published while validating, learning and detecting patterns

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::{
    ConsensusMethod, DiscoveryType, PatternType, ProviderKey, RequestId, ValidationStatus,
};

/// Everything the validation service announces
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConsensusEvent {
    /// Oracles were dispatched for a request
    EnsembleDispatched {
        request_id: RequestId,
        oracles: usize,
        skipped: usize,
        timestamp: DateTime<Utc>,
    },

    /// One oracle call failed or missed the deadline
    OracleFailed {
        request_id: RequestId,
        provider: ProviderKey,
        kind: String,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// A consensus decision was made
    ConsensusReached {
        request_id: RequestId,
        score: f64,
        confidence: f64,
        status: ValidationStatus,
        method: ConsensusMethod,
        population_size: usize,
        outliers: Vec<ProviderKey>,
        timestamp: DateTime<Utc>,
    },

    /// No oracle produced a result and the fallback was returned
    FallbackUsed {
        request_id: RequestId,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Ground-truth feedback arrived for a decision
    OutcomeRecorded {
        request_id: RequestId,
        actual_success: bool,
        predicted_status: ValidationStatus,
        timestamp: DateTime<Utc>,
    },

    /// A learning cycle replaced the live thresholds
    ThresholdsUpdated {
        previous_approved: f64,
        approved: f64,
        needs_revision: f64,
        f1_score: f64,
        timestamp: DateTime<Utc>,
    },

    /// A due learning cycle kept the previous thresholds
    ThresholdCycleSkipped {
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Telemetry merged an occurrence into a pattern
    PatternDetected {
        request_id: RequestId,
        pattern_type: PatternType,
        signature: String,
        occurrences: u64,
        timestamp: DateTime<Utc>,
    },

    /// Telemetry recorded a discovery
    DiscoveryRecorded {
        request_id: RequestId,
        discovery_type: DiscoveryType,
        confidence: f64,
        impact: f64,
        timestamp: DateTime<Utc>,
    },
}

impl ConsensusEvent {
    /// Snake-case event name, matches the serialized `type` tag
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::EnsembleDispatched { .. } => "ensemble_dispatched",
            Self::OracleFailed { .. } => "oracle_failed",
            Self::ConsensusReached { .. } => "consensus_reached",
            Self::FallbackUsed { .. } => "fallback_used",
            Self::OutcomeRecorded { .. } => "outcome_recorded",
            Self::ThresholdsUpdated { .. } => "thresholds_updated",
            Self::ThresholdCycleSkipped { .. } => "threshold_cycle_skipped",
            Self::PatternDetected { .. } => "pattern_detected",
            Self::DiscoveryRecorded { .. } => "discovery_recorded",
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::EnsembleDispatched { timestamp, .. }
            | Self::OracleFailed { timestamp, .. }
            | Self::ConsensusReached { timestamp, .. }
            | Self::FallbackUsed { timestamp, .. }
            | Self::OutcomeRecorded { timestamp, .. }
            | Self::ThresholdsUpdated { timestamp, .. }
            | Self::ThresholdCycleSkipped { timestamp, .. }
            | Self::PatternDetected { timestamp, .. }
            | Self::DiscoveryRecorded { timestamp, .. } => *timestamp,
        }
    }

    /// Request the event belongs to, if any
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::EnsembleDispatched { request_id, .. }
            | Self::OracleFailed { request_id, .. }
            | Self::ConsensusReached { request_id, .. }
            | Self::FallbackUsed { request_id, .. }
            | Self::OutcomeRecorded { request_id, .. }
            | Self::PatternDetected { request_id, .. }
            | Self::DiscoveryRecorded { request_id, .. } => Some(request_id),
            Self::ThresholdsUpdated { .. } | Self::ThresholdCycleSkipped { .. } => None,
        }
    }
}
