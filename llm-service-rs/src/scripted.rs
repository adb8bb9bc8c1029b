// llm-service-rs/src/scripted.rs
// Deterministic stand-in for a real model: the first rule whose marker
// occurs in the prompt supplies the reply.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use shared_types::ExternalServiceError;

use crate::{InvokeOptions, LanguageModel};

const SERVICE: &str = "scripted-model";

#[derive(Debug, Default)]
pub struct ScriptedModel {
    rules: Vec<(String, String)>,
    fallback: String,
    delay: Option<Duration>,
    failures_left: AtomicUsize,
    transient_failures: bool,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply with `response` to any prompt containing `marker`
    pub fn respond(mut self, marker: impl Into<String>, response: impl Into<String>) -> Self {
        self.rules.push((marker.into(), response.into()));
        self
    }

    /// Reply used when no marker matches
    pub fn otherwise(mut self, response: impl Into<String>) -> Self {
        self.fallback = response.into();
        self
    }

    /// Sleep before every reply
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail the next `count` calls
    pub fn failing(mut self, count: usize, transient: bool) -> Self {
        self.failures_left = AtomicUsize::new(count);
        self.transient_failures = transient;
        self
    }

    pub fn calls(&self) -> usize {
        self.prompts().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    fn take_failure(&self) -> bool {
        self.failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn name(&self) -> &str {
        SERVICE
    }

    async fn invoke(&self, prompt: &str, _options: &InvokeOptions) -> Result<String, ExternalServiceError> {
        self.prompts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(prompt.to_string());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.take_failure() {
            let message = "injected failure";
            return Err(if self.transient_failures {
                ExternalServiceError::transient(SERVICE, message)
            } else {
                ExternalServiceError::permanent(SERVICE, message)
            });
        }

        Ok(self
            .rules
            .iter()
            .find(|(marker, _)| prompt.contains(marker.as_str()))
            .map_or_else(|| self.fallback.clone(), |(_, response)| response.clone()))
    }
}
