// self-improve-rs/src/repository.rs
// Append-only NDJSON file of run outcomes, one serialized RunOutcome per line.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::outcome::RunOutcome;

pub const DEFAULT_STORE_PATH: &str = "data/self-improve/outcomes.ndjson";

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[async_trait]
pub trait OutcomeRepository: Send + Sync {
    async fn insert(&self, outcome: &RunOutcome) -> Result<(), RepositoryError>;

    async fn all(&self) -> Result<Vec<RunOutcome>, RepositoryError>;

    async fn by_category(&self, category: &str) -> Result<Vec<RunOutcome>, RepositoryError> {
        Ok(self
            .all()
            .await?
            .into_iter()
            .filter(|o| o.category == category)
            .collect())
    }
}

pub struct FileBackedRepository {
    path: PathBuf,
}

impl FileBackedRepository {
    /// Creates the parent directory eagerly so a bad path fails at startup
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, RepositoryError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl OutcomeRepository for FileBackedRepository {
    async fn insert(&self, outcome: &RunOutcome) -> Result<(), RepositoryError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        let mut line = serde_json::to_string(outcome)?;
        line.push('\n');
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn all(&self) -> Result<Vec<RunOutcome>, RepositoryError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let mut buf = String::new();
        fs::File::open(&self.path).await?.read_to_string(&mut buf).await?;

        let mut out = Vec::new();
        for line in buf.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<RunOutcome>(line) {
                Ok(outcome) => out.push(outcome),
                Err(err) => tracing::warn!(error = %err, "failed to parse outcome line; skipping"),
            }
        }
        Ok(out)
    }
}
