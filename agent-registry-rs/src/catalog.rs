// agent-registry-rs/src/catalog.rs
// Declarative stage catalog (config/stages.toml)

use std::env;
use std::path::Path;

use serde::Deserialize;
use shared_types::{ConfigurationError, StageId};

pub const CATALOG_PATH_VAR: &str = "STAGE_CATALOG";
pub const DEFAULT_CATALOG_PATH: &str = "config/stages.toml";

/// Configuration file structure for stages.toml
#[derive(Debug, Default, Deserialize)]
pub struct StageCatalog {
    #[serde(default, rename = "stage")]
    pub stages: Vec<StageDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StageDefinition {
    pub id: StageId,
    pub role: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl StageCatalog {
    pub fn parse(contents: &str, origin: &str) -> Result<Self, ConfigurationError> {
        toml::from_str(contents).map_err(|e| ConfigurationError::Parse {
            path: origin.to_string(),
            detail: e.to_string(),
        })
    }

    /// Loads the catalog named by `STAGE_CATALOG` (default
    /// `config/stages.toml`). A missing file yields an empty catalog.
    pub async fn load() -> Result<Self, ConfigurationError> {
        let config_path = env::var(CATALOG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CATALOG_PATH.to_string());
        Self::load_from(&config_path).await
    }

    pub async fn load_from(config_path: &str) -> Result<Self, ConfigurationError> {
        let path = Path::new(config_path);

        if !path.exists() {
            tracing::warn!("Stage catalog not found at {}, skipping declaration check", config_path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ConfigurationError::Io {
                path: config_path.to_string(),
                detail: e.to_string(),
            })?;

        let catalog = Self::parse(&content, config_path)?;
        tracing::info!("Loaded {} stage definitions from {}", catalog.stages.len(), config_path);
        Ok(catalog)
    }

    pub fn find(&self, id: &StageId) -> Option<&StageDefinition> {
        self.stages.iter().find(|def| &def.id == id)
    }
}
