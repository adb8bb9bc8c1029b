use std::sync::Arc;
use std::time::Duration;

use shared_types::{
    Artifact, Classification, DecisionKind, HandoffEntry, RecordStatus, RequestRecord, RoutingRules,
    SelfImproveSettings, Severity, StageId,
};

use crate::{
    optimize_routing_rules, FileBackedRepository, OptimizationPolicy, OutcomeRecorder, OutcomeRepository,
    PerformanceData, RunOutcome, SelfImprover, UNCLASSIFIED,
};

fn finished_record(category: &str, status: RecordStatus, handoffs: usize) -> RequestRecord {
    let intake = StageId::from("receptionist");
    let mut record = RequestRecord::new("help", intake.clone());
    record
        .set_classification(Classification::new(category, Severity::Medium, 0.8).unwrap())
        .unwrap();
    for _ in 0..handoffs {
        record
            .record_decision(HandoffEntry {
                from_stage: intake.clone(),
                to_stage: StageId::from("problem_analyst"),
                reason: "category rule".into(),
                decision_kind: DecisionKind::Handoff,
                timestamp: chrono::Utc::now(),
            })
            .unwrap();
    }
    if status == RecordStatus::Escalated {
        record
            .record_decision(HandoffEntry {
                from_stage: intake.clone(),
                to_stage: intake.clone(),
                reason: "handoff limit exceeded".into(),
                decision_kind: DecisionKind::Escalate,
                timestamp: chrono::Utc::now(),
            })
            .unwrap();
    } else {
        record
            .set_artifact(Artifact::new("fix", vec!["step".into()], 0.9).unwrap())
            .unwrap();
    }
    record.freeze(status).unwrap();
    record
}

fn outcome(category: &str, status: RecordStatus, handoffs: usize) -> RunOutcome {
    RunOutcome::from_record(&finished_record(category, status, handoffs), Duration::from_millis(120))
}

fn enabled_settings() -> SelfImproveSettings {
    SelfImproveSettings {
        enabled: true,
        ..SelfImproveSettings::default()
    }
}

#[test]
fn outcome_captures_record_result() {
    let escalated = outcome("billing", RecordStatus::Escalated, 2);
    assert_eq!(escalated.category, "billing");
    assert_eq!(escalated.handoffs, 2);
    assert!(escalated.escalated());
    assert_eq!(escalated.escalation_reason.as_deref(), Some("handoff limit exceeded"));

    let record = RequestRecord::new("x", StageId::from("receptionist"));
    let unclassified = RunOutcome::from_record(&record, Duration::ZERO);
    assert_eq!(unclassified.category, UNCLASSIFIED);
    assert!(!unclassified.resolved());
}

#[test]
fn recorder_aggregates_per_category() {
    let recorder = OutcomeRecorder::new();
    recorder.record(&outcome("billing", RecordStatus::Completed, 1));
    recorder.record(&outcome("billing", RecordStatus::Escalated, 3));
    recorder.record(&outcome("technical", RecordStatus::Completed, 0));

    let data = recorder.snapshot();
    assert_eq!(data.total_runs(), 3);
    let billing = &data.categories["billing"];
    assert_eq!(billing.runs, 2);
    assert!((billing.success_rate - 0.5).abs() < 1e-9);
    assert!((billing.escalation_rate - 0.5).abs() < 1e-9);
    assert!((billing.avg_handoffs - 2.0).abs() < 1e-9);
    assert!((billing.avg_resolution_ms - 120.0).abs() < 1e-9);
}

#[tokio::test]
async fn concurrent_recording_loses_nothing() {
    let recorder = OutcomeRecorder::new();
    let mut tasks = Vec::new();
    for i in 0..8 {
        let recorder = recorder.clone();
        tasks.push(tokio::spawn(async move {
            let category = if i % 2 == 0 { "billing" } else { "account" };
            for _ in 0..25 {
                recorder.record(&outcome(category, RecordStatus::Completed, 1));
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(recorder.total_runs(), 200);
    assert_eq!(recorder.snapshot().categories["account"].runs, 100);
}

#[test]
fn low_success_category_is_rerouted_to_expert() {
    let rules = RoutingRules::default();
    let recorder = OutcomeRecorder::new();
    for _ in 0..4 {
        recorder.record(&outcome("billing", RecordStatus::Escalated, 1));
    }
    recorder.record(&outcome("billing", RecordStatus::Completed, 1));

    let adjustment = optimize_routing_rules(&rules, &recorder.snapshot(), &OptimizationPolicy::default());
    assert_eq!(
        adjustment.update.category_routes.get("billing"),
        Some(&Some(StageId::from("solution_expert")))
    );
    assert!(adjustment.notes[0].ends_with("(optimized for success rate)"));

    let next = adjustment.update.apply_to(&rules);
    assert_eq!(next.category_route("billing"), Some(&StageId::from("solution_expert")));
    assert_eq!(next.category_route("account"), Some(&StageId::from("problem_analyst")));
}

#[test]
fn small_samples_and_expert_routes_are_left_alone() {
    let rules = RoutingRules::default();
    let recorder = OutcomeRecorder::new();
    for _ in 0..4 {
        recorder.record(&outcome("billing", RecordStatus::Escalated, 0));
    }
    for _ in 0..6 {
        recorder.record(&outcome("technical", RecordStatus::Escalated, 0));
    }

    let adjustment = optimize_routing_rules(&rules, &recorder.snapshot(), &OptimizationPolicy::default());
    assert!(adjustment.update.category_routes.is_empty());
}

#[test]
fn handoff_pressure_raises_self_reported_floor() {
    let rules = RoutingRules {
        max_handoffs: 4,
        ..RoutingRules::default()
    };
    let recorder = OutcomeRecorder::new();
    for _ in 0..5 {
        recorder.record(&outcome("technical", RecordStatus::Escalated, 3));
    }

    let adjustment = optimize_routing_rules(&rules, &recorder.snapshot(), &OptimizationPolicy::default());
    assert_eq!(adjustment.update.handoff_confidence_floor, Some(0.65));

    let capped = RoutingRules {
        handoff_confidence_floor: 0.88,
        ..rules.clone()
    };
    let adjustment = optimize_routing_rules(&capped, &recorder.snapshot(), &OptimizationPolicy::default());
    assert_eq!(adjustment.update.handoff_confidence_floor, Some(0.9));
}

#[test]
fn empty_data_proposes_nothing() {
    let adjustment = optimize_routing_rules(
        &RoutingRules::default(),
        &PerformanceData::default(),
        &OptimizationPolicy::default(),
    );
    assert!(adjustment.is_empty());
    assert!(adjustment.notes.is_empty());
}

#[tokio::test]
async fn disabled_improver_records_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("outcomes.ndjson");
    let improver = SelfImprover::new(SelfImproveSettings {
        store_path: Some(path.to_string_lossy().into_owned()),
        ..SelfImproveSettings::default()
    })
    .unwrap();

    tokio_test::assert_ok!(improver.record_outcome(&outcome("billing", RecordStatus::Completed, 0)).await);
    assert_eq!(improver.recorder().total_runs(), 0);
    assert!(!path.exists());
}

#[tokio::test]
async fn outcomes_persist_and_reload() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Arc::new(FileBackedRepository::new(dir.path().join("nested/outcomes.ndjson")).unwrap());
    let improver = SelfImprover::new(enabled_settings()).unwrap().with_repository(repo.clone());

    for _ in 0..3 {
        improver
            .record_outcome(&outcome("billing", RecordStatus::Escalated, 1))
            .await
            .unwrap();
    }
    improver
        .record_outcome(&outcome("account", RecordStatus::Completed, 1))
        .await
        .unwrap();

    assert_eq!(repo.all().await.unwrap().len(), 4);
    assert_eq!(repo.by_category("billing").await.unwrap().len(), 3);

    let historical = improver.historical_performance().await.unwrap();
    assert_eq!(historical, improver.performance());
}
