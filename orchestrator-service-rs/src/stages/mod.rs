// orchestrator-service-rs/src/stages/mod.rs
// Customer-support stages: receptionist -> problem analyst -> solution
// expert. Stage ids come from the routing rules so deployments can rename
// them without touching code.

use std::sync::Arc;

use agent_registry::StageRegistry;
use llm_service::{LanguageModel, ScriptedModel, ToolService};
use shared_types::{ConfigurationError, RoutingRules, StageExecutionError, StageFailure, StageId};

pub mod parsing;
mod problem_analyst;
mod receptionist;
mod solution_expert;

pub use problem_analyst::ProblemAnalyst;
pub use receptionist::Receptionist;
pub use solution_expert::SolutionExpert;

/// Prompt openings; the offline model keys its canned replies on them
pub mod prompts {
    pub const WELCOME: &str = "Generate a warm, professional welcome message";
    pub const TRIAGE: &str = "Analyze this customer query and provide routing information";
    pub const INVESTIGATION: &str = "Based on this investigation, provide a comprehensive analysis";
    pub const ANALYSIS_MESSAGE: &str = "Based on this analysis, create a clear message for the customer";
    pub const INITIAL_SOLUTION: &str = "Based on this analysis, provide a simple solution";
    pub const SOLUTION: &str = "Develop a comprehensive solution for this customer issue";
    pub const VALIDATION: &str = "Validate this solution for feasibility and completeness";
    pub const SOLUTION_MESSAGE: &str = "Create a clear, professional solution message";
    pub const FOLLOW_UP: &str = "Create a follow-up plan for this solution";
}

/// Registry with the three support stages wired to `model` and `tools`
pub fn support_registry(
    model: Arc<dyn LanguageModel>,
    tools: Arc<dyn ToolService>,
    rules: &RoutingRules,
) -> Result<StageRegistry, ConfigurationError> {
    StageRegistry::builder()
        .register(Arc::new(Receptionist::new(Arc::clone(&model), rules)))
        .register(Arc::new(ProblemAnalyst::new(Arc::clone(&model), Arc::clone(&tools), rules)))
        .register(Arc::new(SolutionExpert::new(model, tools, rules)))
        .build()
}

/// Canned model used when no API key is configured. Every request is
/// triaged as a medium-severity login problem and resolved in two stages.
pub fn offline_model() -> ScriptedModel {
    ScriptedModel::new()
        .respond(
            prompts::WELCOME,
            "Hello and welcome! Thanks for reaching out, let me take a look at your request.",
        )
        .respond(
            prompts::TRIAGE,
            "Category: authentication\n\
             Severity: medium\n\
             Keywords: [login, password, account]\n\
             Confidence: 0.85\n\
             Summary: Customer cannot sign in to their account.\n\
             Recommended Stage: solution_expert",
        )
        .respond(
            prompts::INVESTIGATION,
            "Category: authentication\n\
             Severity: medium\n\
             Keywords: [login, password]\n\
             Confidence: 0.8\n\
             Summary: Likely a stale password or a locked account.",
        )
        .respond(
            prompts::ANALYSIS_MESSAGE,
            "I've looked into this and it looks like an account access problem. A specialist will walk you through the fix.",
        )
        .respond(
            prompts::INITIAL_SOLUTION,
            "Solution Type: Self-service reset\nSteps:\n1. Reset the password\n2. Sign in again\nConfidence: 0.7",
        )
        .respond(
            prompts::SOLUTION,
            "Solution Type: Password reset\n\
             Steps:\n\
             1. Open the sign-in page and choose \"Forgot password\"\n\
             2. Follow the link sent to your registered email address\n\
             3. Sign in with the new password and clear the browser cache if it still fails\n\
             Resources: [Password reset guide]\n\
             Confidence: 0.92\n\
             Estimated Time: 10 minutes\n\
             Follow-up Required: yes",
        )
        .respond(
            prompts::VALIDATION,
            "Feasibility: high\nCompleteness: complete\nClarity: clear\nRisk Level: low\nOverall Quality Score: 0.9",
        )
        .respond(
            prompts::SOLUTION_MESSAGE,
            "Here is how to get back into your account. Follow the steps below and let us know how it goes.",
        )
        .respond(
            prompts::FOLLOW_UP,
            "Follow-up Timing: 24 hours\n\
             Success Criteria: Customer can sign in\n\
             Contingency Plan: Unlock the account manually\n\
             Contact Method: email",
        )
        .otherwise("Thanks, we're on it.")
}

fn failed<E: Into<StageFailure>>(stage: &StageId) -> impl Fn(E) -> StageExecutionError + '_ {
    move |e| StageExecutionError::new(stage, e)
}

/// "solution_expert" -> "solution expert"
fn display_name(stage: &StageId) -> String {
    stage.as_str().replace('_', " ")
}

/// First line of a multi-line field value
fn first_line(value: &str) -> &str {
    value.lines().next().unwrap_or("").trim()
}

#[cfg(test)]
mod tests;
