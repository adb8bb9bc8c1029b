// orchestrator-service-rs/src/stages/receptionist.rs
// Entry stage: greets, triages the request and proposes where it goes.

use std::sync::Arc;

use agent_registry::Stage;
use async_trait::async_trait;
use llm_service::{InvokeOptions, LanguageModel};
use serde_json::json;
use shared_types::{
    Classification, HistoryRole, RequestRecord, RoutingRules, Severity, StageExecutionError, StageId, StageOutput,
    StageSignal,
};
use tracing::{debug, info, instrument};

use super::parsing::{extract_field, extract_list, field_or, parse_severity, safe_float};
use super::{display_name, failed, first_line, prompts};

const SYSTEM_PROMPT: &str = "You are a professional customer service receptionist. Greet customers warmly, \
understand their request, categorise it (technical, billing, account, general, complaint, product), \
assess its urgency (low, medium, high, critical) and prepare it for the right specialist.";

const HUMAN_PHRASES: &[&str] = &[
    "manager",
    "supervisor",
    "human",
    "real person",
    "speak to someone",
    "talk to someone",
];

pub struct Receptionist {
    id: StageId,
    analysis_stage: StageId,
    expert_stage: StageId,
    model: Arc<dyn LanguageModel>,
    options: InvokeOptions,
}

impl Receptionist {
    pub fn new(model: Arc<dyn LanguageModel>, rules: &RoutingRules) -> Self {
        Self {
            id: rules.entry_stage.clone(),
            analysis_stage: rules.analysis_stage.clone(),
            expert_stage: rules.expert_stage.clone(),
            model,
            options: InvokeOptions::with_system_prompt(SYSTEM_PROMPT),
        }
    }

    /// Known stage named in the model's recommendation; the analysis stage
    /// otherwise, including when the model recommends the receptionist.
    fn recommended_stage(&self, value: Option<&str>) -> StageId {
        let value = value.unwrap_or("").to_ascii_lowercase();
        if value.contains(self.expert_stage.as_str()) {
            self.expert_stage.clone()
        } else {
            self.analysis_stage.clone()
        }
    }

    async fn triage(&self, raw_input: &str) -> Result<Classification, StageExecutionError> {
        let prompt = format!(
            "{}:\n\"{}\"\n\n\
             Respond with:\n\
             Category: [technical|billing|general|complaint|account|product]\n\
             Severity: [low|medium|high|critical]\n\
             Keywords: [keyword1, keyword2, keyword3]\n\
             Confidence: [0.0-1.0]\n\
             Summary: [brief analysis summary]\n\
             Recommended Stage: [{}|{}|{}]",
            prompts::TRIAGE,
            raw_input,
            self.id,
            self.analysis_stage,
            self.expert_stage
        );
        let response = self.model.invoke(&prompt, &self.options).await.map_err(failed(&self.id))?;

        let category = field_or(&response, "Category", "general");
        let severity = parse_severity(extract_field(&response, "Severity").as_deref()).unwrap_or(Severity::Medium);
        let confidence = safe_float(extract_field(&response, "Confidence").as_deref(), 0.8);
        let recommendation = extract_field(&response, "Recommended Stage")
            .or_else(|| extract_field(&response, "Recommended Agent"));
        let summary = extract_field(&response, "Summary").unwrap_or_default();

        let classification = Classification::new(first_line(&category), severity, confidence)
            .map_err(failed(&self.id))?
            .with_keywords(extract_list(&response, "Keywords"))
            .with_recommended_stage(self.recommended_stage(recommendation.as_deref()))
            .with_summary(summary);
        Ok(classification)
    }
}

fn asks_for_human(raw_input: &str) -> bool {
    let text = raw_input.to_lowercase();
    HUMAN_PHRASES.iter().any(|phrase| text.contains(phrase))
}

#[async_trait]
impl Stage for Receptionist {
    fn id(&self) -> &StageId {
        &self.id
    }

    fn description(&self) -> &str {
        "Greets the customer and triages the request"
    }

    #[instrument(name = "stage_receptionist", skip(self, record), fields(request_id = %record.request_id()))]
    async fn execute(&self, mut record: RequestRecord) -> Result<StageOutput, StageExecutionError> {
        if record.history().is_empty() {
            let greeting = self
                .model
                .invoke(&format!("{} for a customer service chat.", prompts::WELCOME), &self.options)
                .await
                .map_err(failed(&self.id))?;
            record
                .append_history(&self.id, HistoryRole::Stage, greeting)
                .map_err(failed(&self.id))?;
        }

        let classification = self.triage(record.raw_input()).await?;
        let category = classification.category().to_string();
        let severity = classification.severity();
        let confidence = classification.confidence();
        let recommended = classification
            .recommended_stage()
            .cloned()
            .unwrap_or_else(|| self.analysis_stage.clone());
        let notes = classification.summary().unwrap_or_default().to_string();

        debug!(%category, %severity, confidence, recommended = %recommended, "Request triaged");
        record.set_classification(classification).map_err(failed(&self.id))?;
        record
            .insert_metadata("receptionist_notes", json!(notes))
            .map_err(failed(&self.id))?;

        if asks_for_human(record.raw_input()) {
            info!("Customer asked for a human agent");
            record
                .append_history(
                    &self.id,
                    HistoryRole::Handoff,
                    "I'm connecting you with a member of our support team who will take it from here.",
                )
                .map_err(failed(&self.id))?;
            return Ok(StageOutput::new(record, StageSignal::human("customer asked for a human agent")));
        }

        let reason = format!("Query categorized as {} with {} severity", category, severity);
        record
            .append_history(
                &self.id,
                HistoryRole::Handoff,
                format!(
                    "I'm connecting you with our {} who can best help with your {} request.",
                    display_name(&recommended),
                    category
                ),
            )
            .map_err(failed(&self.id))?;

        Ok(StageOutput::new(record, StageSignal::handoff(recommended, confidence, reason)))
    }
}
