//! # Standardized Error Types
//!
//! The structured error envelope shared by every crate of the orchestration
//! engine. Domain errors stay as `thiserror` enums in their own crates and
//! convert into [`Error`] through [`ServiceError`] when they are logged.

use std::fmt;
use std::error::Error as StdError;
use serde::{Serialize, Deserialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};

/// A type alias for Result with the error type defaulting to our Error
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The severity level of an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Severity {
    /// Informational message, not an actual error
    Info,
    /// A minor issue, the request can still complete
    Minor,
    /// A significant issue that forced a retry or an escalation
    #[default]
    Major,
    /// A critical issue that aborted a request
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Minor => write!(f, "MINOR"),
            Severity::Major => write!(f, "MAJOR"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Categorizes different kinds of errors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Invalid configuration detected at construction time
    Configuration,
    /// Malformed input or stage output
    Validation,
    /// A stage failed while executing
    Stage,
    /// Timeout error
    Timeout,
    /// Stage or service could not be reached
    Unavailable,
    /// External service or API error
    External,
    /// Checkpoint or outcome storage error
    Storage,
    /// The controller broke one of its own loop bounds
    LoopSafety,
    /// Input/output error
    IO,
    /// Error in data processing or transformation
    Processing,
    /// Internal error
    Internal,
}

impl ErrorKind {
    /// Stable snake_case label, used as a metrics and log field value
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Validation => "validation",
            ErrorKind::Stage => "stage",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::External => "external",
            ErrorKind::Storage => "storage",
            ErrorKind::LoopSafety => "loop_safety",
            ErrorKind::IO => "io",
            ErrorKind::Processing => "processing",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error envelope.
///
/// `Clone` drops the opaque `cause`; everything else is preserved so the
/// error can be logged or serialized from several places.
#[derive(Debug, Serialize, Deserialize)]
pub struct Error {
    /// A unique identifier for this error instance
    pub id: Uuid,
    /// The kind of error that occurred
    pub kind: ErrorKind,
    /// Detailed error message
    pub message: String,
    /// The time when the error occurred
    pub timestamp: DateTime<Utc>,
    /// Error severity level
    pub severity: Severity,
    /// Component where the error originated (stage id, store, llm client)
    pub service: Option<String>,
    /// Request id of the record being processed, when known
    pub correlation_id: Option<String>,
    /// Additional context as key-value pairs
    #[serde(default)]
    pub context: serde_json::Map<String, serde_json::Value>,
    /// Chain of causes (not serialized)
    #[serde(skip)]
    pub cause: Option<Box<dyn StdError + Send + Sync>>,
    /// Flag indicating if this is a transient error that might succeed on retry
    pub transient: bool,
}

impl Clone for Error {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            kind: self.kind.clone(),
            message: self.message.clone(),
            timestamp: self.timestamp,
            severity: self.severity,
            service: self.service.clone(),
            correlation_id: self.correlation_id.clone(),
            context: self.context.clone(),
            cause: None,
            transient: self.transient,
        }
    }
}

impl Error {
    /// Creates a new error, picking up the correlation id of the current task
    pub fn new<S: Into<String>>(kind: ErrorKind, message: S) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            message: message.into(),
            timestamp: Utc::now(),
            severity: Severity::default(),
            service: None,
            correlation_id: crate::logging::current_correlation_id(),
            context: serde_json::Map::new(),
            cause: None,
            transient: false,
        }
    }

    /// Sets the error severity
    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Sets the originating component
    pub fn service<S: Into<String>>(mut self, service: S) -> Self {
        self.service = Some(service.into());
        self
    }

    /// Adds context information to the error
    pub fn context<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Serialize,
    {
        if let Ok(value) = serde_json::to_value(value) {
            self.context.insert(key.into(), value);
        }
        self
    }

    /// Chains this error with its cause
    pub fn cause<E>(mut self, cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Marks this error as transient (can be retried)
    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }

    pub fn is_transient(&self) -> bool {
        self.transient
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.kind, self.message)?;

        if let Some(service) = &self.service {
            write!(f, " [Service: {}]", service)?;
        }

        if let Some(correlation_id) = &self.correlation_id {
            write!(f, " [CorrelationID: {}]", correlation_id)?;
        }

        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause.as_ref().map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::new(ErrorKind::IO, err.to_string()).cause(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::new(ErrorKind::Processing, format!("JSON error: {}", err)).cause(err)
    }
}

/// Implemented by the domain errors of each crate so they can be logged
/// through the same structured path.
pub trait ServiceError: StdError + Send + Sync + 'static {
    /// Converts the service error to the standard Error type
    fn to_error(&self) -> Error;

    /// Returns true if this error is transient and might succeed on retry
    fn is_transient(&self) -> bool;

    /// Returns the error's severity level
    fn severity(&self) -> Severity;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = Error::new(ErrorKind::Stage, "classifier produced no category")
            .service("receptionist")
            .context("attempt", 2)
            .severity(Severity::Minor);

        assert_eq!(err.kind, ErrorKind::Stage);
        assert_eq!(err.service.as_deref(), Some("receptionist"));
        assert_eq!(err.context.get("attempt"), Some(&serde_json::json!(2)));
        assert_eq!(err.severity, Severity::Minor);
        assert!(!err.is_transient());
    }

    #[test]
    fn test_error_display() {
        let err = Error::new(ErrorKind::Timeout, "stage exceeded 30s")
            .service("solution_expert");

        let display = format!("{}", err);
        assert!(display.contains("MAJOR"));
        assert!(display.contains("timeout"));
        assert!(display.contains("Service: solution_expert"));
    }

    #[test]
    fn test_clone_drops_cause() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err = Error::from(io).transient();
        assert!(err.cause.is_some());

        let cloned = err.clone();
        assert!(cloned.cause.is_none());
        assert_eq!(cloned.id, err.id);
        assert!(cloned.transient);
    }
}
