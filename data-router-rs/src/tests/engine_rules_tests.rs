// data-router-rs/src/tests/engine_rules_tests.rs
// Rule-by-rule coverage of RoutingEngine::decide

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use shared_types::{
    reasons, Artifact, Classification, DecisionKind, HandoffEntry, RequestRecord, RoutingDecision, RoutingRules,
    Severity, StageId, StageSignal,
};

use crate::RoutingEngine;

const RECEPTIONIST: &str = "receptionist";
const ANALYST: &str = "problem_analyst";
const EXPERT: &str = "solution_expert";

fn engine_with(rules: RoutingRules) -> RoutingEngine {
    let known: BTreeSet<StageId> = [RECEPTIONIST, ANALYST, EXPERT].into_iter().map(StageId::from).collect();
    RoutingEngine::new(Arc::new(rules), Arc::new(known))
}

fn engine() -> RoutingEngine {
    engine_with(RoutingRules::default())
}

fn record_at(stage: &str, category: &str, severity: Severity, confidence: f64) -> RequestRecord {
    let mut record = RequestRecord::new("my account is broken", StageId::from(RECEPTIONIST));
    record
        .set_classification(Classification::new(category, severity, confidence).unwrap())
        .unwrap();
    record.set_current_stage(StageId::from(stage)).unwrap();
    record
}

fn entry(from: &str, to: &str, reason: &str, kind: DecisionKind) -> HandoffEntry {
    HandoffEntry {
        from_stage: from.into(),
        to_stage: to.into(),
        reason: reason.to_string(),
        decision_kind: kind,
        timestamp: Utc::now(),
    }
}

fn with_artifact(mut record: RequestRecord) -> RequestRecord {
    record
        .set_artifact(Artifact::new("technical_fix", vec!["Clear the session cache".into()], 0.92).unwrap())
        .unwrap();
    record
}

#[test]
fn handoff_limit_reserves_last_slot_for_escalation() {
    let mut rules = RoutingRules::default();
    rules.max_handoffs = 3;
    let engine = engine_with(rules);
    let record = record_at(RECEPTIONIST, "general", Severity::Low, 0.9);
    let signal = StageSignal::stay(0.9, "still working");

    let one = vec![entry(RECEPTIONIST, RECEPTIONIST, reasons::CONTINUE, DecisionKind::Continue)];
    assert_eq!(engine.decide(&record, &signal, &one), RoutingDecision::ContinueCurrent);

    let two = vec![one[0].clone(), one[0].clone()];
    assert_eq!(
        engine.decide(&record, &signal, &two),
        RoutingDecision::Escalate(reasons::HANDOFF_LIMIT.into())
    );
}

#[test]
fn human_request_escalates_before_severity() {
    let record = record_at(RECEPTIONIST, "billing", Severity::Critical, 0.9);
    let decision = engine().decide(&record, &StageSignal::human("asked for a supervisor"), &[]);
    assert_eq!(decision, RoutingDecision::Escalate(reasons::HUMAN_REQUIRED.into()));
}

#[test]
fn critical_severity_beats_low_confidence() {
    let record = record_at(RECEPTIONIST, "general", Severity::Critical, 0.3);
    let decision = engine().decide(&record, &StageSignal::handoff(ANALYST, 0.3, "unsure"), &[]);
    assert_eq!(decision, RoutingDecision::HandoffTo(EXPERT.into(), "critical severity".into()));
}

#[test]
fn critical_severity_at_expert_continues_until_artifact() {
    let record = record_at(EXPERT, "general", Severity::Critical, 0.3);
    let signal = StageSignal::stay(0.4, "working on it");
    assert_eq!(engine().decide(&record, &signal, &[]), RoutingDecision::ContinueCurrent);

    let resolved = with_artifact(record);
    assert_eq!(
        engine().decide(&resolved, &signal, &[]),
        RoutingDecision::End(reasons::ARTIFACT_PRODUCED.into())
    );
}

#[test]
fn low_confidence_goes_to_analysis_once() {
    let record = record_at(RECEPTIONIST, "general", Severity::Medium, 0.3);
    let signal = StageSignal::handoff(EXPERT, 0.9, "guess");
    assert_eq!(
        engine().decide(&record, &signal, &[]),
        RoutingDecision::HandoffTo(ANALYST.into(), reasons::LOW_CONFIDENCE.into())
    );

    // analysis already happened and confidence stayed low: the expert keeps the record
    let at_expert = record_at(EXPERT, "general", Severity::Medium, 0.3);
    let trail = vec![
        entry(RECEPTIONIST, ANALYST, reasons::LOW_CONFIDENCE, DecisionKind::Handoff),
        entry(ANALYST, EXPERT, reasons::SELF_REPORTED, DecisionKind::Handoff),
    ];
    assert_eq!(
        engine().decide(&at_expert, &StageSignal::stay(0.3, "drafting"), &trail),
        RoutingDecision::ContinueCurrent
    );

    // at the analysis stage itself rule 4 never fires
    let at_analysis = record_at(ANALYST, "general", Severity::Medium, 0.3);
    assert_eq!(
        engine().decide(&at_analysis, &signal, &trail[..1]),
        RoutingDecision::HandoffTo(EXPERT.into(), reasons::SELF_REPORTED.into())
    );
}

#[test]
fn category_route_applies_once() {
    let record = record_at(RECEPTIONIST, "billing", Severity::Medium, 0.8);
    let signal = StageSignal::handoff(EXPERT, 0.8, "looks simple");
    assert_eq!(
        engine().decide(&record, &signal, &[]),
        RoutingDecision::HandoffTo(ANALYST.into(), reasons::CATEGORY_RULE.into())
    );

    // at the expert the billing route must not pull the record back
    let at_expert = record_at(EXPERT, "billing", Severity::Medium, 0.8);
    let trail = vec![
        entry(RECEPTIONIST, ANALYST, reasons::CATEGORY_RULE, DecisionKind::Handoff),
        entry(ANALYST, EXPERT, reasons::SELF_REPORTED, DecisionKind::Handoff),
    ];
    assert_eq!(
        engine().decide(&at_expert, &StageSignal::stay(0.8, "drafting"), &trail),
        RoutingDecision::ContinueCurrent
    );
}

#[test]
fn self_reported_handoff_needs_confidence_and_known_stage() {
    let record = record_at(RECEPTIONIST, "authentication", Severity::Medium, 0.85);

    let weak = StageSignal::handoff(ANALYST, 0.55, "maybe");
    assert_eq!(engine().decide(&record, &weak, &[]), RoutingDecision::ContinueCurrent);

    let unknown = StageSignal::handoff("billing_desk", 0.95, "send to billing");
    assert_eq!(engine().decide(&record, &unknown, &[]), RoutingDecision::ContinueCurrent);

    let strong = StageSignal::handoff(ANALYST, 0.85, "needs analysis");
    assert_eq!(
        engine().decide(&record, &strong, &[]),
        RoutingDecision::HandoffTo(ANALYST.into(), reasons::SELF_REPORTED.into())
    );
}

#[test]
fn terminal_stage_with_artifact_ends() {
    let record = with_artifact(record_at(EXPERT, "authentication", Severity::Medium, 0.85));
    let decision = engine().decide(&record, &StageSignal::stay(0.92, "plan ready"), &[]);
    assert_eq!(decision, RoutingDecision::End(reasons::ARTIFACT_PRODUCED.into()));
}

#[test]
fn non_terminal_stage_without_signal_continues() {
    let record = RequestRecord::new("hello?", StageId::from(RECEPTIONIST));
    let decision = engine().decide(&record, &StageSignal::stay(0.2, "waiting"), &[]);
    assert_eq!(decision, RoutingDecision::ContinueCurrent);
}

#[test]
fn decide_is_deterministic() {
    let record = record_at(ANALYST, "account", Severity::High, 0.65);
    let signal = StageSignal::handoff(EXPERT, 0.9, "expert needed");
    let trail = vec![entry(RECEPTIONIST, ANALYST, reasons::CATEGORY_RULE, DecisionKind::Handoff)];
    let engine = engine();
    let first = engine.decide(&record, &signal, &trail);
    for _ in 0..10 {
        assert_eq!(engine.decide(&record, &signal, &trail), first);
    }
}

#[test]
fn explanation_mentions_reason_and_confidence() {
    let signal = StageSignal::handoff(EXPERT, 0.9, "expert needed");
    let text = engine().explain(&RoutingDecision::HandoffTo(EXPERT.into(), reasons::SELF_REPORTED.into()), &signal);
    assert!(text.contains("solution_expert"));
    assert!(text.contains("0.90"));
    assert!(text.contains("expert needed"));
}
