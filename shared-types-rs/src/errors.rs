// shared-types-rs/src/errors.rs
// Error taxonomy shared by stages, the router and the controller

use std::time::Duration;

use error_handling::{Error, ErrorKind, RetryCategory, RetryableError, ServiceError, Severity};
use serde::{Deserialize, Serialize};

use crate::record::StageId;

/// Failure reported by a language model or tool backend
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
#[error("{service} call failed: {message}")]
pub struct ExternalServiceError {
    pub service: String,
    pub message: String,
    pub transient: bool,
}

impl ExternalServiceError {
    pub fn transient(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            message: message.into(),
            transient: true,
        }
    }

    pub fn permanent(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            message: message.into(),
            transient: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RecordError {
    #[error("record {0} is frozen")]
    Frozen(String),
    #[error("artifact already set on record {0}")]
    ArtifactAlreadySet(String),
    #[error("confidence {0} outside [0, 1]")]
    InvalidConfidence(f64),
    #[error("unknown severity '{0}'")]
    InvalidSeverity(String),
    #[error("classification category is empty")]
    EmptyCategory,
    #[error("history sequence gap: expected {expected}, found {found}")]
    HistoryGap { expected: u64, found: u64 },
    #[error("a frozen record cannot return to in-flight")]
    InvalidTransition,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum StageFailure {
    #[error(transparent)]
    External(#[from] ExternalServiceError),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("invalid output: {0}")]
    InvalidOutput(String),
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error("{0}")]
    Internal(String),
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("stage '{stage_id}' failed: {cause}")]
pub struct StageExecutionError {
    pub stage_id: StageId,
    pub cause: StageFailure,
}

impl StageExecutionError {
    pub fn new(stage_id: &StageId, cause: impl Into<StageFailure>) -> Self {
        Self {
            stage_id: stage_id.clone(),
            cause: cause.into(),
        }
    }

    pub fn timeout(stage_id: &StageId, after: Duration) -> Self {
        Self::new(stage_id, StageFailure::Timeout(after))
    }

    pub fn invalid_output(stage_id: &StageId, detail: impl Into<String>) -> Self {
        Self::new(stage_id, StageFailure::InvalidOutput(detail.into()))
    }

    pub fn internal(stage_id: &StageId, detail: impl Into<String>) -> Self {
        Self::new(stage_id, StageFailure::Internal(detail.into()))
    }
}

impl RetryableError for StageExecutionError {
    fn is_transient(&self) -> bool {
        match &self.cause {
            StageFailure::External(e) => e.transient,
            StageFailure::Timeout(_) | StageFailure::InvalidOutput(_) => true,
            StageFailure::Record(_) | StageFailure::Internal(_) => false,
        }
    }

    fn categorize(&self) -> RetryCategory {
        match &self.cause {
            StageFailure::Timeout(_) => RetryCategory::Timeout,
            StageFailure::External(_) => RetryCategory::Server,
            StageFailure::InvalidOutput(_) | StageFailure::Record(_) => RetryCategory::Client,
            StageFailure::Internal(_) => RetryCategory::Normal,
        }
    }
}

impl ServiceError for StageExecutionError {
    fn to_error(&self) -> Error {
        let kind = match &self.cause {
            StageFailure::External(_) => ErrorKind::External,
            StageFailure::Timeout(_) => ErrorKind::Timeout,
            StageFailure::InvalidOutput(_) | StageFailure::Record(_) => ErrorKind::Validation,
            StageFailure::Internal(_) => ErrorKind::Stage,
        };
        let mut error = Error::new(kind, self.cause.to_string())
            .service(self.stage_id.as_str())
            .severity(ServiceError::severity(self));
        if RetryableError::is_transient(self) {
            error = error.transient();
        }
        error
    }

    fn is_transient(&self) -> bool {
        RetryableError::is_transient(self)
    }

    fn severity(&self) -> Severity {
        match &self.cause {
            StageFailure::Record(_) | StageFailure::Internal(_) => Severity::Major,
            _ => Severity::Minor,
        }
    }
}

/// Invalid setup detected while building the registry, the routing table or
/// the orchestrator
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("{context} references unknown stage '{stage}'")]
    UnknownStage { context: String, stage: StageId },
    #[error("stage '{0}' registered twice")]
    DuplicateStage(StageId),
    #[error("{name} must be within [0, 1], got {value}")]
    InvalidThreshold { name: &'static str, value: f64 },
    #[error("invalid value for {name}: {detail}")]
    InvalidValue { name: String, detail: String },
    #[error("failed to read {path}: {detail}")]
    Io { path: String, detail: String },
    #[error("failed to parse {path}: {detail}")]
    Parse { path: String, detail: String },
}

impl ServiceError for ConfigurationError {
    fn to_error(&self) -> Error {
        Error::new(ErrorKind::Configuration, self.to_string()).severity(Severity::Critical)
    }

    fn is_transient(&self) -> bool {
        false
    }

    fn severity(&self) -> Severity {
        Severity::Critical
    }
}
