// agent-registry-rs/src/lib.rs
// Stage registry: maps stage ids to implementations. Built once, read-only
// afterwards, so lookups need no locking.

pub mod catalog;
pub mod stage;

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use shared_types::{ConfigurationError, StageId};

pub use catalog::{StageCatalog, StageDefinition};
pub use stage::Stage;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistryError {
    #[error("no stage registered under '{0}'")]
    NotFound(StageId),
}

#[derive(Default)]
pub struct StageRegistry {
    stages: HashMap<StageId, Arc<dyn Stage>>,
}

impl fmt::Debug for StageRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageRegistry").field("stages", &self.ids()).finish()
    }
}

impl StageRegistry {
    pub fn builder() -> StageRegistryBuilder {
        StageRegistryBuilder::default()
    }

    pub fn resolve(&self, id: &StageId) -> Result<Arc<dyn Stage>, RegistryError> {
        self.stages
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.clone()))
    }

    pub fn contains(&self, id: &StageId) -> bool {
        self.stages.contains_key(id)
    }

    pub fn ids(&self) -> BTreeSet<StageId> {
        self.stages.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Every stage declared in the catalog must have an implementation
    pub fn ensure_declared(&self, catalog: &StageCatalog) -> Result<(), ConfigurationError> {
        for def in &catalog.stages {
            if !self.contains(&def.id) {
                return Err(ConfigurationError::UnknownStage {
                    context: format!("stage catalog ({})", def.role),
                    stage: def.id.clone(),
                });
            }
        }
        for id in self.ids() {
            if !catalog.stages.is_empty() && catalog.find(&id).is_none() {
                tracing::warn!(stage = %id, "Registered stage is missing from the catalog");
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct StageRegistryBuilder {
    stages: Vec<Arc<dyn Stage>>,
}

impl StageRegistryBuilder {
    pub fn register(mut self, stage: Arc<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Fails on duplicate ids
    pub fn build(self) -> Result<StageRegistry, ConfigurationError> {
        let mut stages = HashMap::with_capacity(self.stages.len());
        for stage in self.stages {
            let id = stage.id().clone();
            if stages.insert(id.clone(), stage).is_some() {
                return Err(ConfigurationError::DuplicateStage(id));
            }
            tracing::info!(stage = %id, "Stage registered");
        }
        Ok(StageRegistry { stages })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use shared_types::{HistoryRole, RequestRecord, StageExecutionError, StageOutput, StageSignal};

    struct Echo(StageId);

    #[async_trait]
    impl Stage for Echo {
        fn id(&self) -> &StageId {
            &self.0
        }

        async fn execute(&self, mut record: RequestRecord) -> Result<StageOutput, StageExecutionError> {
            record
                .append_history(&self.0, HistoryRole::Stage, "echo")
                .map_err(|e| StageExecutionError::new(&self.0, e))?;
            Ok(StageOutput::new(record, StageSignal::stay(1.0, "echo")))
        }
    }

    fn echo(id: &str) -> Arc<dyn Stage> {
        Arc::new(Echo(StageId::from(id)))
    }

    #[test]
    fn resolves_registered_stages() {
        let registry = StageRegistry::builder()
            .register(echo("intake"))
            .register(echo("resolution"))
            .build()
            .unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.resolve(&"intake".into()).is_ok());
        assert_eq!(
            registry.resolve(&"billing".into()).err(),
            Some(RegistryError::NotFound("billing".into()))
        );
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let err = StageRegistry::builder()
            .register(echo("intake"))
            .register(echo("intake"))
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigurationError::DuplicateStage("intake".into()));
    }

    #[tokio::test]
    async fn resolved_stage_executes() {
        let registry = StageRegistry::builder().register(echo("intake")).build().unwrap();
        let stage = registry.resolve(&"intake".into()).unwrap();
        let output = stage
            .execute(RequestRecord::new("hello", "intake".into()))
            .await
            .unwrap();
        assert_eq!(output.record.history().len(), 1);
    }
}
