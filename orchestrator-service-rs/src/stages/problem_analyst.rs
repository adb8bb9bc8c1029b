// orchestrator-service-rs/src/stages/problem_analyst.rs
// Analysis stage: investigates the request with the knowledge base,
// re-assesses the classification and hands the record to the expert.

use std::sync::Arc;

use agent_registry::Stage;
use async_trait::async_trait;
use llm_service::knowledge_base::{SEARCH_TOOL, SIMILAR_CASES_TOOL};
use llm_service::{InvokeOptions, LanguageModel, ScoredArticle, ToolService};
use serde::Serialize;
use serde_json::{json, Value};
use shared_types::{
    Classification, HistoryRole, RequestRecord, RoutingRules, Severity, StageExecutionError, StageId, StageOutput,
    StageSignal,
};
use tracing::{debug, instrument, warn};

use super::parsing::{extract_field, extract_list, extract_steps, field_or, parse_severity, safe_float};
use super::{display_name, failed, first_line, prompts};

const SYSTEM_PROMPT: &str = "You are an expert problem analyst for customer service. Investigate issues in depth, \
identify root causes and contributing factors, and assess complexity and impact. Be thorough, analytical \
and clear about severity.";

const ESCALATION_CONFIDENCE: f64 = 0.9;
const ROUTINE_CONFIDENCE: f64 = 0.75;

#[derive(Debug, Clone, Serialize)]
struct Investigation {
    complexity: &'static str,
    potential_causes: Vec<&'static str>,
    impact: &'static str,
    similar_cases: Vec<String>,
    articles: Vec<String>,
}

pub struct ProblemAnalyst {
    id: StageId,
    expert_stage: StageId,
    model: Arc<dyn LanguageModel>,
    tools: Arc<dyn ToolService>,
    options: InvokeOptions,
}

impl ProblemAnalyst {
    pub fn new(model: Arc<dyn LanguageModel>, tools: Arc<dyn ToolService>, rules: &RoutingRules) -> Self {
        Self {
            id: rules.analysis_stage.clone(),
            expert_stage: rules.expert_stage.clone(),
            model,
            tools,
            options: InvokeOptions::with_system_prompt(SYSTEM_PROMPT),
        }
    }

    /// Knowledge-base search and similar-case lookup run concurrently; a
    /// failed lookup only leaves its part of the investigation empty.
    async fn investigate(&self, query: &str) -> Investigation {
        let (articles, cases) = tokio::join!(
            self.tools.call_tool(SEARCH_TOOL, json!({ "query": query, "limit": 3 })),
            self.tools.call_tool(SIMILAR_CASES_TOOL, json!({ "query": query })),
        );

        let articles = articles
            .map_err(|e| warn!(error = %e, "Knowledge base search failed"))
            .ok()
            .and_then(|value| serde_json::from_value::<Vec<ScoredArticle>>(value).ok())
            .unwrap_or_default();
        let similar_cases = cases
            .map_err(|e| warn!(error = %e, "Similar case lookup failed"))
            .ok()
            .and_then(|value| serde_json::from_value::<Vec<String>>(value).ok())
            .unwrap_or_default();

        Investigation {
            complexity: assess_complexity(query),
            potential_causes: potential_causes(query),
            impact: assess_impact(query),
            similar_cases,
            articles: articles.into_iter().map(|a| a.article.title).collect(),
        }
    }

    async fn reassess(
        &self,
        record: &RequestRecord,
        investigation: &Investigation,
    ) -> Result<Classification, StageExecutionError> {
        let previous = record.classification();
        let prompt = format!(
            "{}:\n\n\
             Query: {}\n\
             Complexity: {}\n\
             Potential Causes: {}\n\
             Impact: {}\n\
             Related Articles: {}\n\n\
             Provide:\n\
             Category: [technical|billing|general|complaint|account|product]\n\
             Severity: [low|medium|high|critical]\n\
             Keywords: [keyword1, keyword2, keyword3]\n\
             Confidence: [0.0-1.0]\n\
             Summary: [detailed analysis summary]",
            prompts::INVESTIGATION,
            record.raw_input(),
            investigation.complexity,
            investigation.potential_causes.join(", "),
            investigation.impact,
            investigation.articles.join(", "),
        );
        let response = self.model.invoke(&prompt, &self.options).await.map_err(failed(&self.id))?;

        let previous_category = previous.map_or("general", |c| c.category());
        let category = field_or(&response, "Category", previous_category);
        let severity = parse_severity(extract_field(&response, "Severity").as_deref())
            .or_else(|| previous.map(|c| c.severity()))
            .unwrap_or(Severity::Medium);
        let confidence = safe_float(extract_field(&response, "Confidence").as_deref(), 0.8);
        let mut keywords = extract_list(&response, "Keywords");
        if keywords.is_empty() {
            keywords = previous.map(|c| c.keywords().to_vec()).unwrap_or_default();
        }
        let summary = extract_field(&response, "Summary")
            .or_else(|| previous.and_then(|c| c.summary()).map(str::to_string))
            .unwrap_or_default();

        Ok(Classification::new(first_line(&category), severity, confidence)
            .map_err(failed(&self.id))?
            .with_keywords(keywords)
            .with_recommended_stage(self.expert_stage.clone())
            .with_summary(summary))
    }

    async fn initial_solution(&self, classification: &Classification) -> Result<Value, StageExecutionError> {
        let prompt = format!(
            "{}:\n\n{}\n\nProvide:\nSolution Type: [brief type]\nSteps: [2-3 simple steps]\nConfidence: [0.0-1.0]",
            prompts::INITIAL_SOLUTION,
            classification.summary().unwrap_or_default(),
        );
        let response = self.model.invoke(&prompt, &self.options).await.map_err(failed(&self.id))?;
        Ok(json!({
            "solution_type": first_line(&field_or(&response, "Solution Type", "general")),
            "steps": extract_steps(&response),
            "confidence": safe_float(extract_field(&response, "Confidence").as_deref(), 0.7),
        }))
    }
}

fn assess_complexity(query: &str) -> &'static str {
    const LEVELS: &[(&str, &[&str])] = &[
        ("high", &["integration", "api", "system", "architecture", "multiple", "complex"]),
        ("medium", &["account", "billing", "technical", "configuration"]),
        ("low", &["how", "what", "where", "simple", "basic"]),
    ];
    let query = query.to_lowercase();
    LEVELS
        .iter()
        .find(|(_, indicators)| indicators.iter().any(|i| query.contains(i)))
        .map_or("medium", |(level, _)| *level)
}

fn potential_causes(query: &str) -> Vec<&'static str> {
    let query = query.to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| query.contains(w));
    if has(&["login", "password"]) {
        vec!["Incorrect credentials", "Account locked", "Browser issues", "Network problems"]
    } else if has(&["billing", "charge"]) {
        vec!["System error", "Duplicate transaction", "Subscription issue", "Payment processing"]
    } else if has(&["api", "integration"]) {
        vec!["Authentication failure", "Rate limiting", "Endpoint changes", "Configuration errors"]
    } else {
        vec!["Unknown cause - needs investigation"]
    }
}

fn assess_impact(query: &str) -> &'static str {
    const HIGH_IMPACT: &[&str] = &["urgent", "critical", "emergency", "production", "down", "broken"];
    let query = query.to_lowercase();
    if HIGH_IMPACT.iter().any(|k| query.contains(k)) {
        "high"
    } else {
        "medium"
    }
}

#[async_trait]
impl Stage for ProblemAnalyst {
    fn id(&self) -> &StageId {
        &self.id
    }

    fn description(&self) -> &str {
        "Investigates the request and re-assesses its classification"
    }

    #[instrument(name = "stage_problem_analyst", skip(self, record), fields(request_id = %record.request_id()))]
    async fn execute(&self, mut record: RequestRecord) -> Result<StageOutput, StageExecutionError> {
        let investigation = self.investigate(record.raw_input()).await;
        debug!(
            complexity = investigation.complexity,
            impact = investigation.impact,
            articles = investigation.articles.len(),
            "Investigation finished"
        );

        let classification = self.reassess(&record, &investigation).await?;
        let message_prompt = format!(
            "{}:\n\n\
             Analysis Summary: {}\n\
             Severity: {}\n\
             Category: {}\n\n\
             The message should acknowledge the issue, explain what was found, \
             set expectations for resolution and list next steps.",
            prompts::ANALYSIS_MESSAGE,
            classification.summary().unwrap_or_default(),
            classification.severity(),
            classification.category(),
        );
        let message = self
            .model
            .invoke(&message_prompt, &self.options)
            .await
            .map_err(failed(&self.id))?;

        let escalation = match classification.severity() {
            Severity::High | Severity::Critical => Some("High severity issue requires expert intervention"),
            _ if classification.confidence() < 0.7 => Some("Low confidence requires expert review"),
            _ => None,
        };

        let (confidence, reason) = match escalation {
            Some(reason) => (ESCALATION_CONFIDENCE, reason.to_string()),
            None => {
                if classification.severity() == Severity::Low && classification.confidence() > 0.8 {
                    let solution = self.initial_solution(&classification).await?;
                    record
                        .insert_metadata("initial_solution", solution)
                        .map_err(failed(&self.id))?;
                }
                (ROUTINE_CONFIDENCE, "Analysis complete, expert to finalise the resolution".to_string())
            }
        };

        let investigation = serde_json::to_value(&investigation)
            .map_err(|e| StageExecutionError::internal(&self.id, e.to_string()))?;
        record
            .insert_metadata("investigation", investigation)
            .map_err(failed(&self.id))?;
        record.set_classification(classification).map_err(failed(&self.id))?;
        record
            .append_history(&self.id, HistoryRole::Stage, message)
            .map_err(failed(&self.id))?;
        record
            .append_history(
                &self.id,
                HistoryRole::Handoff,
                format!("Transferring you to our {}: {}.", display_name(&self.expert_stage), reason),
            )
            .map_err(failed(&self.id))?;

        Ok(StageOutput::new(
            record,
            StageSignal::handoff(self.expert_stage.clone(), confidence, reason),
        ))
    }
}
