// shared-types-rs/src/config.rs
// Engine configuration: TOML file first, environment overrides second

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use config_rs::{env_flag, env_list, env_parse, env_string};
use error_handling::LoggingConfig;
use serde::{Deserialize, Serialize};

use crate::errors::ConfigurationError;
use crate::record::{Severity, StageId};

pub const CONFIG_PATH_VAR: &str = "ORCHESTRATOR_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/orchestrator.toml";

/// Routing thresholds and stage mappings. A copy is stored on every record
/// at creation, so edits only affect records created afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingRules {
    pub entry_stage: StageId,
    pub analysis_stage: StageId,
    pub expert_stage: StageId,
    pub terminal_stage: StageId,
    pub max_handoffs: usize,
    pub confidence_floor: f64,
    pub handoff_confidence_floor: f64,
    /// category (lowercase) -> stage
    pub category_routes: BTreeMap<String, StageId>,
    /// severity name -> stage
    pub severity_routes: BTreeMap<String, StageId>,
}

impl Default for RoutingRules {
    fn default() -> Self {
        let category_routes = [
            ("technical", "solution_expert"),
            ("billing", "problem_analyst"),
            ("account", "problem_analyst"),
        ]
        .into_iter()
        .map(|(category, stage)| (category.to_string(), StageId::from(stage)))
        .collect();

        let severity_routes = BTreeMap::from([("critical".to_string(), StageId::from("solution_expert"))]);

        Self {
            entry_stage: StageId::from("receptionist"),
            analysis_stage: StageId::from("problem_analyst"),
            expert_stage: StageId::from("solution_expert"),
            terminal_stage: StageId::from("solution_expert"),
            max_handoffs: 8,
            confidence_floor: 0.5,
            handoff_confidence_floor: 0.6,
            category_routes,
            severity_routes,
        }
    }
}

impl RoutingRules {
    /// Stage that `severity` routes to, if any
    pub fn severity_route(&self, severity: Severity) -> Option<&StageId> {
        self.severity_routes.get(severity.as_str())
    }

    pub fn category_route(&self, category: &str) -> Option<&StageId> {
        self.category_routes.get(category)
    }

    /// Every stage id the rules refer to, with where it is referenced
    pub fn referenced_stages(&self) -> Vec<(String, &StageId)> {
        let mut refs = vec![
            ("routing.entry_stage".to_string(), &self.entry_stage),
            ("routing.analysis_stage".to_string(), &self.analysis_stage),
            ("routing.expert_stage".to_string(), &self.expert_stage),
            ("routing.terminal_stage".to_string(), &self.terminal_stage),
        ];
        refs.extend(
            self.category_routes
                .iter()
                .map(|(category, stage)| (format!("routing.category_routes.{}", category), stage)),
        );
        refs.extend(
            self.severity_routes
                .iter()
                .map(|(severity, stage)| (format!("routing.severity_routes.{}", severity), stage)),
        );
        refs
    }

    /// Checks thresholds and bounds; stage membership is checked against the
    /// registry by the routing table.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        for (name, value) in [
            ("confidence_floor", self.confidence_floor),
            ("handoff_confidence_floor", self.handoff_confidence_floor),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigurationError::InvalidThreshold { name, value });
            }
        }
        // one slot for a real transition, one reserved for the escalation entry
        if self.max_handoffs < 2 {
            return Err(ConfigurationError::InvalidValue {
                name: "routing.max_handoffs".into(),
                detail: format!("must be at least 2, got {}", self.max_handoffs),
            });
        }
        for key in self.severity_routes.keys() {
            key.parse::<Severity>().map_err(|e| ConfigurationError::InvalidValue {
                name: format!("routing.severity_routes.{}", key),
                detail: e.to_string(),
            })?;
        }
        for key in self.category_routes.keys() {
            if key.trim().is_empty() || key.to_lowercase() != *key {
                return Err(ConfigurationError::InvalidValue {
                    name: format!("routing.category_routes.{}", key),
                    detail: "category keys must be non-empty lowercase".into(),
                });
            }
        }
        Ok(())
    }
}

/// Partial update for [`RoutingRules`]. A `None` inside a route map removes
/// the mapping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingRulesUpdate {
    pub max_handoffs: Option<usize>,
    pub confidence_floor: Option<f64>,
    pub handoff_confidence_floor: Option<f64>,
    pub category_routes: BTreeMap<String, Option<StageId>>,
    pub severity_routes: BTreeMap<String, Option<StageId>>,
}

impl RoutingRulesUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply_to(&self, rules: &RoutingRules) -> RoutingRules {
        let mut next = rules.clone();
        if let Some(value) = self.max_handoffs {
            next.max_handoffs = value;
        }
        if let Some(value) = self.confidence_floor {
            next.confidence_floor = value;
        }
        if let Some(value) = self.handoff_confidence_floor {
            next.handoff_confidence_floor = value;
        }
        for (category, stage) in &self.category_routes {
            let key = category.trim().to_lowercase();
            match stage {
                Some(stage) => next.category_routes.insert(key, stage.clone()),
                None => next.category_routes.remove(&key),
            };
        }
        for (severity, stage) in &self.severity_routes {
            let key = severity.trim().to_lowercase();
            match stage {
                Some(stage) => next.severity_routes.insert(key, stage.clone()),
                None => next.severity_routes.remove(&key),
            };
        }
        next
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerSettings {
    /// Total executions allowed per stage visit, first attempt included
    pub attempt_limit: usize,
    pub stage_timeout_ms: u64,
    pub stage_timeouts_ms: BTreeMap<String, u64>,
    pub retry_base_backoff_ms: u64,
    pub retry_max_backoff_ms: u64,
    pub retry_jitter: f64,
    /// Overall per-request deadline; none when unset
    pub deadline_ms: Option<u64>,
    pub checkpoint_queue: usize,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            attempt_limit: 2,
            stage_timeout_ms: 30_000,
            stage_timeouts_ms: BTreeMap::new(),
            retry_base_backoff_ms: 200,
            retry_max_backoff_ms: 2_000,
            retry_jitter: 0.1,
            deadline_ms: None,
            checkpoint_queue: 64,
        }
    }
}

impl ControllerSettings {
    pub fn stage_timeout(&self, stage: &StageId) -> Duration {
        let ms = self
            .stage_timeouts_ms
            .get(stage.as_str())
            .copied()
            .unwrap_or(self.stage_timeout_ms);
        Duration::from_millis(ms)
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.attempt_limit == 0 {
            return Err(ConfigurationError::InvalidValue {
                name: "controller.attempt_limit".into(),
                detail: "must be at least 1".into(),
            });
        }
        if self.stage_timeout_ms == 0 || self.stage_timeouts_ms.values().any(|ms| *ms == 0) {
            return Err(ConfigurationError::InvalidValue {
                name: "controller.stage_timeout_ms".into(),
                detail: "timeouts must be positive".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.retry_jitter) {
            return Err(ConfigurationError::InvalidThreshold {
                name: "controller.retry_jitter",
                value: self.retry_jitter,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    File,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub backend: StoreBackend,
    pub directory: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            directory: "data/checkpoints".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub base_url: String,
    pub model: String,
    pub fallback_models: Vec<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub initial_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    /// Only ever read from the environment
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            fallback_models: Vec::new(),
            temperature: 0.7,
            max_tokens: 1000,
            request_timeout_secs: 30,
            max_retries: 1,
            initial_retry_delay_ms: 500,
            max_retry_delay_ms: 4_000,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelfImproveSettings {
    pub enabled: bool,
    /// Apply proposed rule adjustments immediately instead of only logging them
    pub live_apply: bool,
    pub min_samples: u64,
    pub success_floor: f64,
    pub store_path: Option<String>,
}

impl Default for SelfImproveSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            live_apply: false,
            min_samples: 5,
            success_floor: 0.7,
            store_path: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub routing: RoutingRules,
    pub controller: ControllerSettings,
    pub storage: StorageSettings,
    pub llm: LlmSettings,
    pub logging: LoggingConfig,
    pub self_improve: SelfImproveSettings,
}

impl EngineConfig {
    /// Reads the file named by `ORCHESTRATOR_CONFIG` (default
    /// `config/orchestrator.toml`), then applies environment overrides. A
    /// missing file yields the defaults.
    pub fn load() -> Result<Self, ConfigurationError> {
        let path = env_string(CONFIG_PATH_VAR).unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
        let mut config = if Path::new(&path).exists() {
            Self::from_file(&path)?
        } else {
            tracing::info!(path = %path, "No configuration file found, using defaults");
            Self::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| ConfigurationError::Io {
            path: path.display().to_string(),
            detail: e.to_string(),
        })?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigurationError::Parse { detail, .. } => ConfigurationError::Parse {
                path: path.display().to_string(),
                detail,
            },
            other => other,
        })
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigurationError> {
        toml::from_str(contents).map_err(|e| ConfigurationError::Parse {
            path: "<inline>".to_string(),
            detail: e.to_string(),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.routing.validate()?;
        self.controller.validate()
    }

    pub fn apply_env_overrides(&mut self) {
        let routing = &mut self.routing;
        if let Some(v) = env_parse("ORCHESTRATOR_MAX_HANDOFFS") {
            routing.max_handoffs = v;
        }
        if let Some(v) = env_parse("ORCHESTRATOR_CONFIDENCE_FLOOR") {
            routing.confidence_floor = v;
        }
        if let Some(v) = env_parse("ORCHESTRATOR_HANDOFF_CONFIDENCE_FLOOR") {
            routing.handoff_confidence_floor = v;
        }

        let controller = &mut self.controller;
        if let Some(v) = env_parse("ORCHESTRATOR_ATTEMPT_LIMIT") {
            controller.attempt_limit = v;
        }
        if let Some(v) = env_parse("ORCHESTRATOR_STAGE_TIMEOUT_MS") {
            controller.stage_timeout_ms = v;
        }
        if let Some(v) = env_parse("ORCHESTRATOR_DEADLINE_MS") {
            controller.deadline_ms = Some(v);
        }

        match env_string("ORCHESTRATOR_STORE").as_deref() {
            Some("memory") => self.storage.backend = StoreBackend::Memory,
            Some("file") => self.storage.backend = StoreBackend::File,
            Some(other) => tracing::warn!(value = %other, "Unknown ORCHESTRATOR_STORE, keeping configured backend"),
            None => {}
        }
        if let Some(dir) = env_string("ORCHESTRATOR_STORE_DIR") {
            self.storage.directory = dir;
        }

        let llm = &mut self.llm;
        llm.api_key = env_string("OPENAI_API_KEY");
        if let Some(url) = env_string("OPENAI_BASE_URL") {
            llm.base_url = url;
        }
        if let Some(model) = env_string("OPENAI_MODEL") {
            llm.model = model;
        }
        if let Some(models) = env_list("OPENAI_FALLBACK_MODELS") {
            llm.fallback_models = models;
        }
        if let Some(v) = env_parse("OPENAI_TEMPERATURE") {
            llm.temperature = v;
        }

        if let Some(level) = env_string("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(json) = env_flag("LOG_JSON") {
            self.logging.json_format = json;
        }

        if let Some(enabled) = env_flag("SELF_IMPROVE_ENABLED") {
            self.self_improve.enabled = enabled;
        }
        if let Some(live) = env_flag("SELF_IMPROVE_LIVE_APPLY") {
            self.self_improve.live_apply = live;
        }
        if let Some(path) = env_string("SELF_IMPROVE_STORE_PATH") {
            self.self_improve.store_path = Some(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.routing.confidence_floor, 0.5);
        assert_eq!(config.routing.handoff_confidence_floor, 0.6);
        assert_eq!(config.controller.attempt_limit, 2);
        assert_eq!(
            config.routing.severity_route(Severity::Critical),
            Some(&StageId::from("solution_expert"))
        );
    }

    #[test]
    fn parses_partial_toml() {
        let config = EngineConfig::from_toml_str(
            r#"
            [routing]
            max_handoffs = 5
            confidence_floor = 0.4

            [routing.category_routes]
            authentication = "problem_analyst"

            [controller]
            attempt_limit = 3
            stage_timeouts_ms = { solution_expert = 60000 }

            [storage]
            backend = "file"
            directory = "/tmp/orchestrator"
            "#,
        )
        .unwrap();

        assert_eq!(config.routing.max_handoffs, 5);
        assert_eq!(config.routing.handoff_confidence_floor, 0.6);
        assert_eq!(
            config.routing.category_route("authentication"),
            Some(&StageId::from("problem_analyst"))
        );
        assert_eq!(config.controller.attempt_limit, 3);
        assert_eq!(
            config.controller.stage_timeout(&StageId::from("solution_expert")),
            Duration::from_secs(60)
        );
        assert_eq!(config.controller.stage_timeout(&StageId::from("receptionist")), Duration::from_secs(30));
        assert_eq!(config.storage.backend, StoreBackend::File);
    }

    #[test]
    fn malformed_toml_is_a_configuration_error() {
        let err = EngineConfig::from_toml_str("[routing]\nmax_handoffs = \"many\"").unwrap_err();
        assert!(matches!(err, ConfigurationError::Parse { .. }));
    }

    #[test]
    fn validation_rejects_bad_thresholds() {
        let mut rules = RoutingRules::default();
        rules.confidence_floor = 1.5;
        assert!(matches!(rules.validate(), Err(ConfigurationError::InvalidThreshold { .. })));

        let mut rules = RoutingRules::default();
        rules.max_handoffs = 1;
        assert!(rules.validate().is_err());

        let mut rules = RoutingRules::default();
        rules.severity_routes.insert("urgent".into(), StageId::from("solution_expert"));
        assert!(rules.validate().is_err());
    }

    #[test]
    fn update_applies_and_removes_routes() {
        let mut update = RoutingRulesUpdate::default();
        assert!(update.is_empty());
        update.confidence_floor = Some(0.55);
        update.category_routes.insert("Billing".into(), Some(StageId::from("solution_expert")));
        update.category_routes.insert("account".into(), None);

        let rules = update.apply_to(&RoutingRules::default());
        assert_eq!(rules.confidence_floor, 0.55);
        assert_eq!(rules.category_route("billing"), Some(&StageId::from("solution_expert")));
        assert_eq!(rules.category_route("account"), None);
        assert_eq!(rules.category_route("technical"), Some(&StageId::from("solution_expert")));
    }
}
