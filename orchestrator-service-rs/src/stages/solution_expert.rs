// orchestrator-service-rs/src/stages/solution_expert.rs
// Terminal stage: produces the resolution plan artifact, validates it and
// plans the follow-up.

use std::sync::Arc;

use agent_registry::Stage;
use async_trait::async_trait;
use llm_service::knowledge_base::SEARCH_TOOL;
use llm_service::{InvokeOptions, LanguageModel, ScoredArticle, ToolService};
use serde_json::json;
use shared_types::{
    Artifact, HistoryRole, RequestRecord, RoutingRules, StageExecutionError, StageId, StageOutput, StageSignal,
};
use tracing::{info, instrument, warn};

use super::parsing::{extract_field, extract_list, extract_steps, field_or, safe_float, yes_no};
use super::{failed, first_line, prompts};

const SYSTEM_PROMPT: &str = "You are a senior solution expert for customer service. Develop comprehensive, \
actionable solutions with clear step-by-step instructions, validate their feasibility and plan the \
follow-up needed to confirm the issue is resolved.";

const UNFORMATTED_STEPS: &str = "Solution steps not clearly formatted";

pub struct SolutionExpert {
    id: StageId,
    model: Arc<dyn LanguageModel>,
    tools: Arc<dyn ToolService>,
    options: InvokeOptions,
}

impl SolutionExpert {
    pub fn new(model: Arc<dyn LanguageModel>, tools: Arc<dyn ToolService>, rules: &RoutingRules) -> Self {
        Self {
            id: rules.expert_stage.clone(),
            model,
            tools,
            options: InvokeOptions::with_system_prompt(SYSTEM_PROMPT),
        }
    }

    async fn knowledge_base_titles(&self, query: &str) -> Vec<String> {
        match self.tools.call_tool(SEARCH_TOOL, json!({ "query": query, "limit": 3 })).await {
            Ok(value) => serde_json::from_value::<Vec<ScoredArticle>>(value)
                .map(|hits| hits.into_iter().map(|h| h.article.title).collect())
                .unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Knowledge base search failed");
                Vec::new()
            }
        }
    }

    async fn ask(&self, prompt: &str) -> Result<String, StageExecutionError> {
        self.model.invoke(prompt, &self.options).await.map_err(failed(&self.id))
    }

    async fn develop_solution(&self, record: &RequestRecord) -> Result<Artifact, StageExecutionError> {
        let classification = record.classification();
        let articles = self.knowledge_base_titles(record.raw_input()).await;
        let prompt = format!(
            "{}:\n\n\
             Issue: {}\n\
             Category: {}\n\
             Severity: {}\n\
             Analysis: {}\n\
             Knowledge Base: {}\n\n\
             Provide:\n\
             Solution Type: [type of solution]\n\
             Steps: [numbered step-by-step instructions]\n\
             Resources: [helpful resources or links]\n\
             Confidence: [0.0-1.0]\n\
             Estimated Time: [time to resolve]\n\
             Follow-up Required: [yes|no]",
            prompts::SOLUTION,
            record.raw_input(),
            classification.map_or("unclassified", |c| c.category()),
            classification.map_or("unknown".to_string(), |c| c.severity().to_string()),
            classification.and_then(|c| c.summary()).unwrap_or_default(),
            articles.join(", "),
        );
        let response = self.ask(&prompt).await?;

        let mut steps = extract_steps(&response);
        if steps.is_empty() {
            steps.push(UNFORMATTED_STEPS.to_string());
        }
        let solution_type = field_or(&response, "Solution Type", "General resolution");
        let confidence = safe_float(extract_field(&response, "Confidence").as_deref(), 0.8);

        let mut artifact =
            Artifact::new(first_line(&solution_type), steps, confidence).map_err(failed(&self.id))?;
        artifact.resources = extract_list(&response, "Resources");
        for title in articles {
            if !artifact.resources.contains(&title) {
                artifact.resources.push(title);
            }
        }
        artifact.estimated_effort = extract_field(&response, "Estimated Time").map(|t| first_line(&t).to_string());
        artifact.follow_up_required = yes_no(extract_field(&response, "Follow-up Required").as_deref());
        Ok(artifact)
    }

    async fn validate_solution(&self, artifact: &Artifact) -> Result<serde_json::Value, StageExecutionError> {
        let prompt = format!(
            "{}:\n\n\
             Solution Type: {}\n\
             Steps: {}\n\
             Confidence: {:.2}\n\n\
             Provide:\n\
             Feasibility: [high|medium|low]\n\
             Completeness: [complete|partial|incomplete]\n\
             Clarity: [clear|somewhat clear|unclear]\n\
             Risk Level: [low|medium|high]\n\
             Overall Quality Score: [0.0-1.0]",
            prompts::VALIDATION,
            artifact.solution_type,
            artifact.steps.join("; "),
            artifact.confidence(),
        );
        let response = self.ask(&prompt).await?;
        Ok(json!({
            "feasibility": first_line(&field_or(&response, "Feasibility", "unknown")),
            "completeness": first_line(&field_or(&response, "Completeness", "unknown")),
            "clarity": first_line(&field_or(&response, "Clarity", "unknown")),
            "risk_level": first_line(&field_or(&response, "Risk Level", "unknown")),
            "quality_score": safe_float(extract_field(&response, "Overall Quality Score").as_deref(), 0.8),
        }))
    }

    async fn plan_follow_up(&self, artifact: &Artifact) -> Result<serde_json::Value, StageExecutionError> {
        if !artifact.follow_up_required {
            return Ok(json!({ "required": false }));
        }
        let prompt = format!(
            "{}:\n\n\
             Solution Type: {}\n\
             Estimated Time: {}\n\n\
             Provide:\n\
             Follow-up Timing: [when to follow up]\n\
             Success Criteria: [how to confirm resolution]\n\
             Contingency Plan: [what to do if it did not work]\n\
             Contact Method: [email|phone|chat]",
            prompts::FOLLOW_UP,
            artifact.solution_type,
            artifact.estimated_effort.as_deref().unwrap_or("unknown"),
        );
        let response = self.ask(&prompt).await?;
        Ok(json!({
            "required": true,
            "timing": first_line(&field_or(&response, "Follow-up Timing", "48 hours")),
            "success_criteria": field_or(&response, "Success Criteria", ""),
            "contingency_plan": field_or(&response, "Contingency Plan", ""),
            "contact_method": first_line(&field_or(&response, "Contact Method", "email")),
        }))
    }
}

#[async_trait]
impl Stage for SolutionExpert {
    fn id(&self) -> &StageId {
        &self.id
    }

    fn description(&self) -> &str {
        "Builds, validates and delivers the resolution plan"
    }

    #[instrument(name = "stage_solution_expert", skip(self, record), fields(request_id = %record.request_id()))]
    async fn execute(&self, mut record: RequestRecord) -> Result<StageOutput, StageExecutionError> {
        if let Some(existing) = record.artifact() {
            let confidence = existing.confidence();
            record
                .append_history(
                    &self.id,
                    HistoryRole::Stage,
                    "Your resolution plan is above. Let us know if any step is unclear.",
                )
                .map_err(failed(&self.id))?;
            return Ok(StageOutput::new(record, StageSignal::stay(confidence, "Resolution plan already delivered")));
        }

        let artifact = self.develop_solution(&record).await?;
        let validation = self.validate_solution(&artifact).await?;
        let follow_up = self.plan_follow_up(&artifact).await?;

        let message_prompt = format!(
            "{} for the customer:\n\n\
             Solution Type: {}\n\
             Steps:\n{}\n\
             Estimated Time: {}\n\n\
             Keep it empathetic, easy to follow and end with what happens next.",
            prompts::SOLUTION_MESSAGE,
            artifact.solution_type,
            artifact
                .steps
                .iter()
                .enumerate()
                .map(|(i, step)| format!("{}. {}", i + 1, step))
                .collect::<Vec<_>>()
                .join("\n"),
            artifact.estimated_effort.as_deref().unwrap_or("unknown"),
        );
        let message = self.ask(&message_prompt).await?;

        info!(
            solution_type = %artifact.solution_type,
            steps = artifact.steps.len(),
            confidence = artifact.confidence(),
            "Resolution plan ready"
        );

        let confidence = artifact.confidence();
        record.set_artifact(artifact).map_err(failed(&self.id))?;
        record
            .insert_metadata("solution_validation", validation)
            .map_err(failed(&self.id))?;
        record
            .insert_metadata("follow_up_plan", follow_up)
            .map_err(failed(&self.id))?;
        record
            .append_history(&self.id, HistoryRole::Stage, message)
            .map_err(failed(&self.id))?;

        Ok(StageOutput::new(record, StageSignal::stay(confidence, "Resolution plan delivered")))
    }
}
