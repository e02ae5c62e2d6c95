//! Telemetry collector
//!
//! Keeps the bounded event log, the merged pattern table and the discovery
//! list, and buffers events into batches. The collector is plain owned state;
//! the validation service persists what it returns.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::rules::{self, Finding};
use crate::ensemble::stats;
use crate::state::{
    pattern_key, schema::caps, ConsensusSummary, Distribution, DiscoveryType, ProviderKey,
    TelemetryBatch, ValidationDiscovery, ValidationPattern,
};

/// Discoveries considered by `process_discoveries`
pub const PROCESS_WINDOW: usize = 50;
/// Occurrences a discovery type needs before it is surfaced
pub const MIN_GROUP_SIZE: usize = 2;
const TOP_DISCOVERIES: usize = 10;
const RECENT_PATTERN_DAYS: i64 = 7;
/// Consensus above this counts as a successful validation in the dashboard
const SUCCESS_SCORE: f64 = 70.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub enabled: bool,
    /// Events buffered before a batch is flushed
    pub batch_size: usize,
    /// Discoveries below this confidence are dropped
    pub discovery_confidence_threshold: f64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: 10,
            discovery_confidence_threshold: 0.5,
        }
    }
}

/// A finding after it was applied to collector state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Detection {
    /// Pattern state after the merge
    Pattern(ValidationPattern),
    Discovery(ValidationDiscovery),
}

/// What recording one event produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordedEvent {
    pub detections: Vec<Detection>,
    /// Set when the event filled the batch buffer
    pub batch: Option<TelemetryBatch>,
}

/// Discoveries of one type, ranked by strength
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedDiscovery {
    pub discovery_type: DiscoveryType,
    pub count: usize,
    pub average_confidence: f64,
    pub average_impact: f64,
    /// `count * average_confidence * average_impact`
    pub strength: f64,
    pub providers: BTreeSet<ProviderKey>,
    pub latest: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationMetrics {
    pub total_validations: usize,
    /// Validations with more than one member
    pub ensemble_validations: usize,
    /// Seconds
    pub average_response_time: f64,
    pub average_consensus: f64,
    pub provider_usage: BTreeMap<ProviderKey, usize>,
    pub discovery_count: usize,
    pub pattern_count: usize,
    pub success_rate: f64,
    pub confidence: Distribution,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryHealth {
    pub enabled: bool,
    pub buffered_events: usize,
    pub stored_events: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryDashboard {
    pub generated_at: DateTime<Utc>,
    pub metrics: ValidationMetrics,
    pub top_discoveries: Vec<ValidationDiscovery>,
    pub recent_patterns: Vec<ValidationPattern>,
    pub health: TelemetryHealth,
}

#[derive(Debug, Clone)]
pub struct TelemetryCollector {
    config: TelemetryConfig,
    events: Vec<ConsensusSummary>,
    patterns: BTreeMap<String, ValidationPattern>,
    discoveries: Vec<ValidationDiscovery>,
    buffer: Vec<ConsensusSummary>,
}

impl TelemetryCollector {
    pub fn new(config: TelemetryConfig) -> Self {
        Self::with_state(config, Vec::new(), BTreeMap::new(), Vec::new())
    }

    /// Resume from persisted collections
    pub fn with_state(
        config: TelemetryConfig,
        events: Vec<ConsensusSummary>,
        patterns: BTreeMap<String, ValidationPattern>,
        discoveries: Vec<ValidationDiscovery>,
    ) -> Self {
        let mut collector = Self {
            config,
            events,
            patterns,
            discoveries,
            buffer: Vec::new(),
        };
        collector.enforce_caps();
        collector
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn events(&self) -> &[ConsensusSummary] {
        &self.events
    }

    pub fn patterns(&self) -> &BTreeMap<String, ValidationPattern> {
        &self.patterns
    }

    pub fn discoveries(&self) -> &[ValidationDiscovery] {
        &self.discoveries
    }

    /// Log an event, run the rules and merge what they find.
    ///
    /// A no-op when telemetry is disabled.
    pub fn record_event(&mut self, summary: ConsensusSummary) -> RecordedEvent {
        if !self.config.enabled {
            return RecordedEvent::default();
        }

        self.events.push(summary.clone());
        let recent_scores: Vec<f64> = self
            .events
            .iter()
            .filter(|e| !e.fallback)
            .map(|e| e.consensus_score)
            .collect();

        let mut detections = Vec::new();
        for finding in rules::evaluate(&summary, &recent_scores) {
            match finding {
                Finding::Pattern {
                    pattern_type,
                    signature,
                    effectiveness,
                    providers,
                } => {
                    let key = pattern_key(pattern_type, &signature);
                    let now = Utc::now();
                    let pattern = self
                        .patterns
                        .entry(key)
                        .and_modify(|p| {
                            p.occurrences += 1;
                            p.effectiveness = 0.8 * p.effectiveness + 0.2 * effectiveness;
                            p.providers.extend(providers.iter().cloned());
                            p.last_updated = now;
                        })
                        .or_insert_with(|| ValidationPattern {
                            pattern_type,
                            signature: signature.clone(),
                            occurrences: 1,
                            effectiveness,
                            providers: providers.clone(),
                            first_detected: now,
                            last_updated: now,
                        });
                    info!(
                        request_id = %summary.request_id,
                        pattern = %pattern_type,
                        signature = %pattern.signature,
                        occurrences = pattern.occurrences,
                        "Validation pattern detected"
                    );
                    detections.push(Detection::Pattern(pattern.clone()));
                }
                Finding::Discovery {
                    discovery_type,
                    description,
                    confidence,
                    impact,
                    providers,
                    data,
                } => {
                    if confidence < self.config.discovery_confidence_threshold {
                        debug!(discovery = %discovery_type, confidence, "Discovery below confidence threshold");
                        continue;
                    }
                    let discovery = ValidationDiscovery {
                        id: uuid::Uuid::new_v4().to_string(),
                        discovery_type,
                        description,
                        confidence,
                        impact,
                        providers,
                        data,
                        recorded_at: Utc::now(),
                    };
                    info!(
                        request_id = %summary.request_id,
                        discovery = %discovery_type,
                        confidence,
                        impact,
                        "Validation discovery recorded"
                    );
                    self.discoveries.push(discovery.clone());
                    detections.push(Detection::Discovery(discovery));
                }
            }
        }
        self.enforce_caps();

        self.buffer.push(summary);
        let batch = if self.buffer.len() >= self.config.batch_size.max(1) {
            self.flush()
        } else {
            None
        };

        RecordedEvent { detections, batch }
    }

    /// Drain the buffer into a batch snapshot
    pub fn flush(&mut self) -> Option<TelemetryBatch> {
        if !self.config.enabled || self.buffer.is_empty() {
            return None;
        }
        let batch = TelemetryBatch {
            batch_id: uuid::Uuid::new_v4().to_string(),
            flushed_at: Utc::now(),
            events: std::mem::take(&mut self.buffer),
            discovery_count: self.discoveries.len(),
            pattern_count: self.patterns.len(),
        };
        debug!(batch_id = %batch.batch_id, events = batch.events.len(), "Telemetry batch flushed");
        Some(batch)
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn enforce_caps(&mut self) {
        let excess = self.events.len().saturating_sub(caps::TELEMETRY_EVENTS);
        self.events.drain(..excess);

        let excess = self.discoveries.len().saturating_sub(caps::DISCOVERIES);
        self.discoveries.drain(..excess);

        while self.patterns.len() > caps::PATTERNS {
            let stalest = self
                .patterns
                .iter()
                .min_by(|a, b| a.1.last_updated.cmp(&b.1.last_updated).then_with(|| a.0.cmp(b.0)))
                .map(|(k, _)| k.clone());
            match stalest {
                Some(key) => {
                    self.patterns.remove(&key);
                }
                None => break,
            }
        }
    }

    /// Group the recent discoveries by type and rank the groups.
    ///
    /// Pure over current state, so repeated calls agree.
    pub fn process_discoveries(&self) -> Vec<ProcessedDiscovery> {
        let start = self.discoveries.len().saturating_sub(PROCESS_WINDOW);
        let mut groups: BTreeMap<DiscoveryType, Vec<&ValidationDiscovery>> = BTreeMap::new();
        for discovery in &self.discoveries[start..] {
            groups.entry(discovery.discovery_type).or_default().push(discovery);
        }

        let mut processed: Vec<ProcessedDiscovery> = groups
            .into_iter()
            .filter(|(_, group)| group.len() >= MIN_GROUP_SIZE)
            .filter_map(|(discovery_type, group)| {
                let count = group.len();
                let average_confidence = group.iter().map(|d| d.confidence).sum::<f64>() / count as f64;
                let average_impact = group.iter().map(|d| d.impact).sum::<f64>() / count as f64;
                let latest = group.iter().map(|d| d.recorded_at).max()?;
                Some(ProcessedDiscovery {
                    discovery_type,
                    count,
                    average_confidence,
                    average_impact,
                    strength: count as f64 * average_confidence * average_impact,
                    providers: group.iter().flat_map(|d| d.providers.iter().cloned()).collect(),
                    latest,
                })
            })
            .collect();

        processed.sort_by(|a, b| {
            b.strength
                .total_cmp(&a.strength)
                .then_with(|| a.discovery_type.as_str().cmp(b.discovery_type.as_str()))
        });
        processed
    }

    pub fn metrics(&self) -> ValidationMetrics {
        let total = self.events.len();
        if total == 0 {
            return ValidationMetrics {
                discovery_count: self.discoveries.len(),
                pattern_count: self.patterns.len(),
                ..Default::default()
            };
        }

        let mut provider_usage = BTreeMap::new();
        for event in &self.events {
            for provider in &event.providers {
                *provider_usage.entry(provider.clone()).or_insert(0) += 1;
            }
        }
        let scores: Vec<f64> = self.events.iter().map(|e| e.consensus_score).collect();
        let times: Vec<f64> = self.events.iter().map(|e| e.elapsed_secs).collect();
        let confidences: Vec<f64> = self.events.iter().map(|e| e.confidence).collect();
        let successes = scores.iter().filter(|s| **s > SUCCESS_SCORE).count();

        ValidationMetrics {
            total_validations: total,
            ensemble_validations: self.events.iter().filter(|e| e.population_size > 1).count(),
            average_response_time: stats::mean(&times),
            average_consensus: stats::mean(&scores),
            provider_usage,
            discovery_count: self.discoveries.len(),
            pattern_count: self.patterns.len(),
            success_rate: successes as f64 / total as f64,
            confidence: stats::distribution(&confidences),
        }
    }

    pub fn dashboard(&self) -> TelemetryDashboard {
        let now = Utc::now();

        let mut top_discoveries = self.discoveries.clone();
        top_discoveries.sort_by(|a, b| {
            (b.confidence * b.impact)
                .total_cmp(&(a.confidence * a.impact))
                .then_with(|| b.recorded_at.cmp(&a.recorded_at))
        });
        top_discoveries.truncate(TOP_DISCOVERIES);

        let cutoff = now - Duration::days(RECENT_PATTERN_DAYS);
        let mut recent_patterns: Vec<ValidationPattern> = self
            .patterns
            .values()
            .filter(|p| p.last_updated >= cutoff)
            .cloned()
            .collect();
        recent_patterns.sort_by(|a, b| b.occurrences.cmp(&a.occurrences).then_with(|| a.key().cmp(&b.key())));

        TelemetryDashboard {
            generated_at: now,
            metrics: self.metrics(),
            top_discoveries,
            recent_patterns,
            health: TelemetryHealth {
                enabled: self.config.enabled,
                buffered_events: self.buffer.len(),
                stored_events: self.events.len(),
            },
        }
    }
}
