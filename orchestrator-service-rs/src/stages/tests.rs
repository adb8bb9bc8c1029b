// orchestrator-service-rs/src/stages/tests.rs
// Support stages driven by scripted model output

use std::sync::Arc;

use agent_registry::Stage;
use async_trait::async_trait;
use llm_service::{KnowledgeBaseTool, ScriptedModel, ToolService};
use serde_json::Value;
use shared_types::{
    Classification, ExternalServiceError, HistoryRole, RequestRecord, RoutingRules, Severity, StageFailure,
};

use super::*;

struct BrokenTools;

#[async_trait]
impl ToolService for BrokenTools {
    async fn call_tool(&self, _name: &str, _args: Value) -> Result<Value, ExternalServiceError> {
        Err(ExternalServiceError::transient("knowledge_base", "connection refused"))
    }
}

fn rules() -> RoutingRules {
    RoutingRules::default()
}

fn kb() -> Arc<dyn ToolService> {
    Arc::new(KnowledgeBaseTool::new())
}

fn record_at(stage: &str, input: &str) -> RequestRecord {
    RequestRecord::new(input, stage.into())
}

#[tokio::test]
async fn receptionist_triages_and_proposes_the_recommended_stage() {
    let model = Arc::new(
        ScriptedModel::new()
            .respond(prompts::WELCOME, "Welcome!")
            .respond(
                prompts::TRIAGE,
                "Category: Billing\nSeverity: high\nKeywords: [refund, charge]\nConfidence: 0.66\n\
                 Summary: Charged twice\nRecommended Stage: solution_expert",
            ),
    );
    let stage = Receptionist::new(model.clone(), &rules());

    let output = stage
        .execute(record_at("receptionist", "I was charged twice this month"))
        .await
        .unwrap();

    let classification = output.record.classification().unwrap();
    assert_eq!(classification.category(), "billing");
    assert_eq!(classification.severity(), Severity::High);
    assert_eq!(classification.keywords(), ["refund", "charge"]);
    assert_eq!(output.signal.proposed_next_stage, Some("solution_expert".into()));
    assert_eq!(output.signal.confidence, 0.66);
    assert!(!output.signal.requires_human);

    let roles: Vec<HistoryRole> = output.record.history().iter().map(|e| e.role).collect();
    assert_eq!(roles, vec![HistoryRole::Stage, HistoryRole::Handoff]);
    assert_eq!(output.record.metadata()["receptionist_notes"], "Charged twice");
    assert_eq!(model.calls(), 2);
}

#[tokio::test]
async fn receptionist_defaults_when_output_is_unstructured() {
    let model = Arc::new(ScriptedModel::new().otherwise("Sure, happy to help!"));
    let stage = Receptionist::new(model, &rules());

    let output = stage.execute(record_at("receptionist", "hello?")).await.unwrap();
    let classification = output.record.classification().unwrap();
    assert_eq!(classification.category(), "general");
    assert_eq!(classification.severity(), Severity::Medium);
    assert_eq!(classification.confidence(), 0.8);
    assert_eq!(output.signal.proposed_next_stage, Some("problem_analyst".into()));
}

#[tokio::test]
async fn receptionist_flags_requests_for_a_human() {
    let model = Arc::new(offline_model());
    let stage = Receptionist::new(model, &rules());

    let output = stage
        .execute(record_at("receptionist", "Let me speak to a supervisor please"))
        .await
        .unwrap();
    assert!(output.signal.requires_human);
    assert!(output.record.classification().is_some());
}

#[tokio::test]
async fn model_failures_surface_as_stage_errors() {
    let model = Arc::new(ScriptedModel::new().otherwise("ok").failing(1, true));
    let stage = Receptionist::new(model, &rules());

    let err = stage.execute(record_at("receptionist", "help")).await.unwrap_err();
    assert_eq!(err.stage_id.as_str(), "receptionist");
    assert!(matches!(err.cause, StageFailure::External(ref e) if e.transient));
}

#[tokio::test]
async fn analyst_escalates_high_severity_to_the_expert() {
    let model = Arc::new(
        ScriptedModel::new()
            .respond(
                prompts::INVESTIGATION,
                "Category: technical\nSeverity: critical\nConfidence: 0.9\nSummary: Production API is down",
            )
            .otherwise("We're looking into it."),
    );
    let stage = ProblemAnalyst::new(model, kb(), &rules());

    let output = stage
        .execute(record_at("problem_analyst", "Our API integration is down in production"))
        .await
        .unwrap();

    assert_eq!(output.signal.proposed_next_stage, Some("solution_expert".into()));
    assert_eq!(output.signal.confidence, 0.9);
    assert!(output.signal.rationale.contains("High severity"));

    let investigation = &output.record.metadata()["investigation"];
    assert_eq!(investigation["complexity"], "high");
    assert_eq!(investigation["impact"], "high");
    assert_eq!(investigation["articles"][0], "API Integration Guide");
    assert!(output.record.metadata().get("initial_solution").is_none());
}

#[tokio::test]
async fn analyst_offers_an_initial_solution_for_simple_cases() {
    let model = Arc::new(
        ScriptedModel::new()
            .respond(
                prompts::INVESTIGATION,
                "Category: account\nSeverity: low\nConfidence: 0.85\nSummary: Wants to change email",
            )
            .respond(
                prompts::INITIAL_SOLUTION,
                "Solution Type: Settings change\nSteps:\n1. Open settings\n2. Edit email\nConfidence: 0.8",
            )
            .otherwise("Here's what we found."),
    );
    let stage = ProblemAnalyst::new(model, kb(), &rules());

    let mut record = record_at("problem_analyst", "How do I change my account email?");
    record
        .set_classification(Classification::new("account", Severity::Low, 0.9).unwrap())
        .unwrap();
    let output = stage.execute(record).await.unwrap();

    assert_eq!(output.signal.confidence, 0.75);
    let solution = &output.record.metadata()["initial_solution"];
    assert_eq!(solution["solution_type"], "Settings change");
    assert_eq!(solution["steps"][1], "Edit email");
}

#[tokio::test]
async fn analyst_survives_tool_outages() {
    let model = Arc::new(ScriptedModel::new().otherwise("Category: general\nSeverity: medium\nConfidence: 0.5"));
    let stage = ProblemAnalyst::new(model, Arc::new(BrokenTools), &rules());

    let output = stage.execute(record_at("problem_analyst", "something odd")).await.unwrap();
    let investigation = &output.record.metadata()["investigation"];
    assert_eq!(investigation["articles"], serde_json::json!([]));
    assert_eq!(investigation["similar_cases"], serde_json::json!([]));
    assert!(output.signal.rationale.contains("Low confidence"));
}

#[tokio::test]
async fn expert_builds_the_resolution_plan() {
    let model = Arc::new(offline_model());
    let stage = SolutionExpert::new(model, kb(), &rules());

    let output = stage
        .execute(record_at("solution_expert", "I forgot my password and cannot login"))
        .await
        .unwrap();

    let artifact = output.record.artifact().unwrap();
    assert_eq!(artifact.solution_type, "Password reset");
    assert_eq!(artifact.steps.len(), 3);
    assert_eq!(artifact.confidence(), 0.92);
    assert_eq!(artifact.estimated_effort.as_deref(), Some("10 minutes"));
    assert!(artifact.follow_up_required);
    assert_eq!(artifact.resources[0], "Password reset guide");
    assert!(artifact.resources.contains(&"Common Login Issues".to_string()));

    let metadata = output.record.metadata();
    assert_eq!(metadata["solution_validation"]["feasibility"], "high");
    assert_eq!(metadata["follow_up_plan"]["contact_method"], "email");
    assert_eq!(output.signal.proposed_next_stage, None);
    assert_eq!(output.signal.confidence, 0.92);
}

#[tokio::test]
async fn expert_falls_back_when_steps_are_unformatted() {
    let model = Arc::new(ScriptedModel::new().otherwise("Just restart it, that usually works."));
    let stage = SolutionExpert::new(model, Arc::new(BrokenTools), &rules());

    let output = stage.execute(record_at("solution_expert", "app frozen")).await.unwrap();
    let artifact = output.record.artifact().unwrap();
    assert_eq!(artifact.steps, vec!["Solution steps not clearly formatted".to_string()]);
    assert!(!artifact.follow_up_required);
    assert_eq!(output.record.metadata()["follow_up_plan"]["required"], false);
}

#[test]
fn support_registry_holds_three_stages() {
    let registry = support_registry(Arc::new(offline_model()), kb(), &rules()).unwrap();
    let ids: Vec<String> = registry.ids().into_iter().map(|id| id.to_string()).collect();
    assert_eq!(ids, vec!["problem_analyst", "receptionist", "solution_expert"]);
}
