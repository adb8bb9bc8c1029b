// llm-service-rs/src/lib.rs
// Model and tool backends used by the support stages.
//
// Stages only see the two traits below, so tests and the offline binary can
// swap the HTTP client for `ScriptedModel` without touching stage code.

use async_trait::async_trait;
use serde_json::Value;
use shared_types::ExternalServiceError;

pub mod knowledge_base;
pub mod llm_client;
pub mod scripted;

#[cfg(test)]
mod tests;

pub use knowledge_base::{Article, KnowledgeBaseTool, ScoredArticle};
pub use llm_client::{sanitize_base_url, LlmClient, LlmError};
pub use scripted::ScriptedModel;

/// Per-call knobs; `None` falls back to the backend's configured value
#[derive(Debug, Clone, Default)]
pub struct InvokeOptions {
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl InvokeOptions {
    pub fn with_system_prompt(prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: Some(prompt.into()),
            ..Self::default()
        }
    }
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Name used in logs and error reports
    fn name(&self) -> &str;

    async fn invoke(&self, prompt: &str, options: &InvokeOptions) -> Result<String, ExternalServiceError>;
}

#[async_trait]
pub trait ToolService: Send + Sync {
    async fn call_tool(&self, name: &str, args: Value) -> Result<Value, ExternalServiceError>;
}
