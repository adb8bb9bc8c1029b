// orchestrator-service-rs/src/error.rs
// Caller-facing errors. Stage failures never show up here: the controller
// turns them into an Escalate decision on the record instead.

use action_ledger::StoreError;
use error_handling::{Error, ErrorKind, ServiceError, Severity};
use shared_types::{ConfigurationError, RecordError, StageId};

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("no checkpoint for request {0}")]
    NotFound(String),

    #[error("request {0} is already running")]
    AlreadyRunning(String),

    #[error("stage '{found}' was resolved for current stage '{expected}'")]
    StageMismatch { expected: StageId, found: StageId },

    #[error("record error: {0}")]
    Record(#[from] RecordError),

    #[error("store error: {0}")]
    Store(StoreError),

    #[error("outcome tracking error: {0}")]
    Outcomes(#[from] self_improve::SelfImproveError),

    #[error("orchestration task failed: {0}")]
    Join(String),
}

impl From<StoreError> for OrchestratorError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => OrchestratorError::NotFound(id),
            other => OrchestratorError::Store(other),
        }
    }
}

impl ServiceError for OrchestratorError {
    fn to_error(&self) -> Error {
        let kind = match self {
            OrchestratorError::Configuration(_) => ErrorKind::Configuration,
            OrchestratorError::NotFound(_) | OrchestratorError::Store(_) => ErrorKind::Storage,
            OrchestratorError::AlreadyRunning(_) => ErrorKind::Validation,
            OrchestratorError::StageMismatch { .. } | OrchestratorError::Record(_) => ErrorKind::Internal,
            OrchestratorError::Outcomes(_) | OrchestratorError::Join(_) => ErrorKind::Internal,
        };
        Error::new(kind, self.to_string())
            .service("orchestrator")
            .severity(ServiceError::severity(self))
    }

    fn is_transient(&self) -> bool {
        matches!(self, OrchestratorError::Store(_))
    }

    fn severity(&self) -> Severity {
        match self {
            OrchestratorError::NotFound(_) | OrchestratorError::AlreadyRunning(_) => Severity::Minor,
            OrchestratorError::Store(_) | OrchestratorError::Outcomes(_) => Severity::Major,
            _ => Severity::Critical,
        }
    }
}
