//! Integration tests for adaptive threshold learning
//!
//! Feeds outcomes through the validation service and checks that learning
//! cycles move the approval line, stay in bounds and persist.

use ensemble_consensus::events::{EventBusExt, EventFilter};
use ensemble_consensus::state::{HistoryStore, ScoreVector};
use ensemble_consensus::thresholds::LearnerConfig;
use ensemble_consensus::{
    AdaptationContext, EngineConfig, LearningCycle, SharedOracle, StubOracle, ValidationOutcome,
    ValidationRequest, ValidationService, ValidationStatus,
};

fn stub(id: &str, provider_type: &str, score: f64) -> SharedOracle {
    StubOracle::new(id, provider_type)
        .with_jitter(0.0)
        .with_scores(ScoreVector::uniform(score))
        .with_confidence(0.85)
        .shared()
}

fn service_with(config: EngineConfig, scores: [f64; 3]) -> ValidationService {
    let oracles = vec![
        stub("a", "claude", scores[0]),
        stub("b", "gemini", scores[1]),
        stub("c", "gpt", scores[2]),
    ];
    ValidationService::new(config, oracles, HistoryStore::in_memory().shared()).unwrap()
}

fn service(config: EngineConfig) -> ValidationService {
    service_with(config, [85.0, 82.0, 88.0])
}

/// Failures score below 78, successes above 80
fn separable(i: usize) -> ValidationOutcome {
    let failures = [60.0, 64.0, 68.0, 72.0, 76.0];
    let successes = [82.0, 86.0, 90.0, 94.0];
    let (score, success) = if i % 2 == 0 {
        (failures[(i / 2) % failures.len()], false)
    } else {
        (successes[(i / 2) % successes.len()], true)
    };
    let status = if score >= 80.0 {
        ValidationStatus::Approved
    } else {
        ValidationStatus::NeedsRevision
    };
    ValidationOutcome::new(score, status, success)
}

/// Test: Separable feedback converges to a high-F1 threshold in bounds
#[tokio::test]
async fn test_learning_reaches_high_f1() {
    let service = service(EngineConfig::default());

    let mut updates = 0;
    for i in 0..60 {
        if service.record_outcome(separable(i)).await.is_updated() {
            updates += 1;
        }
    }
    // Cycles at 20, 30, 40, 50 and 60 outcomes
    assert_eq!(updates, 5);

    let learned = service.threshold_config().await;
    assert!(learned.metrics.f1_score > 0.9, "f1 {}", learned.metrics.f1_score);
    assert_eq!(learned.optimized_f1, Some(1.0));
    assert!((70.0..=90.0).contains(&learned.approved_threshold));
    assert!(learned.approved_threshold < 80.0);
    assert_eq!(learned.cycles, 5);

    let report = service.performance_report().await;
    assert_eq!(report.total_outcomes, 60);
    assert!(report.overall.f1_score > 0.9);
    assert!(report.roc_auc.unwrap() > 0.99);
    assert!(report.trends.is_some());
}

/// Test: Success exactly at score >= 80 keeps the line at 80
#[tokio::test]
async fn test_learning_on_sharp_boundary() {
    let service = service(EngineConfig::default());
    for i in 0..60 {
        let score = 60.0 + ((i * 7) % 40) as f64;
        let status = if score >= 80.0 {
            ValidationStatus::Approved
        } else {
            ValidationStatus::NeedsRevision
        };
        service
            .record_outcome(ValidationOutcome::new(score, status, score >= 80.0))
            .await;
    }

    let learned = service.threshold_config().await;
    assert!(learned.metrics.f1_score > 0.9);
    assert_eq!(learned.optimized_f1, Some(1.0));
    assert!((learned.approved_threshold - 80.0).abs() < 1e-9);
    assert!((learned.needs_revision_threshold - 60.0).abs() < 1e-9);
}

/// Test: Feedback on real decisions drives a cycle and persists it
#[tokio::test]
async fn test_feedback_drives_learning_cycle() {
    let mut config = EngineConfig::default();
    config.learner = LearnerConfig {
        min_samples: 4,
        recompute_every: 2,
        ..Default::default()
    };
    let service = service_with(config, [85.0, 85.0, 85.0]);
    let mut rx = service
        .events()
        .subscribe_filtered(EventFilter::new().types(vec!["thresholds_updated"]));

    for i in 0..4 {
        service
            .validate(ValidationRequest::new("Read", "").with_id(format!("req-{i}")))
            .await;
    }
    let mut cycles = Vec::new();
    for i in 0..4 {
        cycles.push(service.record_feedback(&format!("req-{i}"), i % 2 == 0).await.unwrap());
    }

    assert_eq!(cycles[0], LearningCycle::NotDue);
    assert_eq!(cycles[2], LearningCycle::NotDue);
    // Every decision scored 85; the lowest sweep threshold wins and the line drops
    match &cycles[3] {
        LearningCycle::Updated { previous, current } => {
            assert_eq!(previous.approved_threshold, 80.0);
            assert!((current.approved_threshold - 78.0).abs() < 1e-9);
            assert!((current.needs_revision_threshold - 58.0).abs() < 1e-9);
        }
        other => panic!("expected an update, got {:?}", other),
    }

    let stored = service.store().load_thresholds().unwrap().unwrap();
    assert!((stored.approved_threshold - 78.0).abs() < 1e-9);
    assert!(rx.try_recv().is_ok());
}

/// Test: A single-class window keeps the previous thresholds
#[tokio::test]
async fn test_single_class_feedback_skips_cycle() {
    let service = service(EngineConfig::default());
    let mut last = LearningCycle::NotDue;
    for _ in 0..20 {
        last = service
            .record_outcome(ValidationOutcome::new(85.0, ValidationStatus::Approved, true))
            .await;
    }
    assert!(matches!(last, LearningCycle::Skipped { .. }));
    assert_eq!(service.threshold_config().await.approved_threshold, 80.0);
    assert!(service.store().load_thresholds().unwrap().is_none());
}

/// Test: Context adjusts per-request thresholds without touching the base
#[tokio::test]
async fn test_context_adjustment_is_per_request() {
    let service = service(EngineConfig::default());

    let risky = AdaptationContext {
        tool_complexity: 0.9,
        user_expertise: 0.2,
        project_criticality: 0.9,
        ..Default::default()
    };
    let strict = service.thresholds(&risky).await;
    assert_eq!(strict.approved, 90.0);
    assert!((strict.confidence_minimum - 0.85).abs() < 1e-9);

    let relaxed = service
        .thresholds(&AdaptationContext {
            time_pressure: 0.9,
            past_success_rate: 0.95,
            ..Default::default()
        })
        .await;
    assert_eq!(relaxed.approved, 77.0);

    assert_eq!(service.threshold_config().await.approved_threshold, 80.0);
}

/// Test: High-complexity operations face a stricter line than reads
#[tokio::test]
async fn test_estimated_context_by_operation() {
    let service = service(EngineConfig::default());

    let read = service.validate(ValidationRequest::new("Read", "")).await;
    let bash = service
        .validate(ValidationRequest::new("Bash", "x".repeat(500)))
        .await;

    assert_eq!(read.thresholds.approved, 80.0);
    assert_eq!(bash.thresholds.approved, 85.0);
    assert!(bash.thresholds.confidence_minimum > read.thresholds.confidence_minimum);
}
