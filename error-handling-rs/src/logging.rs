//! # Structured Logging
//!
//! Tracing bootstrap plus request-scoped correlation ids. The correlation id
//! is task-local so it follows a request across `.await` points and worker
//! threads, which a thread-local cannot do under tokio.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use once_cell::sync::OnceCell;
use serde::{Serialize, Deserialize};
use tracing_subscriber::{fmt, EnvFilter, layer::SubscriberExt, util::SubscriberInitExt, Layer, Registry};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use crate::types::{Result, Error, ErrorKind, Severity};

tokio::task_local! {
    static CORRELATION_ID: String;
}

// Flag to track if logging has been initialized
static LOGGING_INITIALIZED: AtomicBool = AtomicBool::new(false);

// Keeps the non-blocking file writer flushing for the life of the process
static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// Configuration for the logging system
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// The log level to use (trace, debug, info, warn, error)
    pub level: String,
    /// The service name for identification and the log file name
    pub service_name: String,
    /// Whether to output logs to a file
    pub file_output: bool,
    /// The directory to store log files in
    pub log_dir: Option<String>,
    /// Whether to use JSON formatting
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            service_name: "orchestrator-service".to_string(),
            file_output: false,
            log_dir: None,
            json_format: false,
        }
    }
}

/// Initializes the structured logging system. Later calls are no-ops.
pub fn init_logging(config: Option<LoggingConfig>) -> Result<()> {
    if LOGGING_INITIALIZED.load(Ordering::SeqCst) {
        return Ok(());
    }

    let config = config.unwrap_or_default();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},warn", config.level)));

    let stdout_layer = if config.json_format {
        fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_target(true)
            .boxed()
    } else {
        fmt::layer().with_target(true).boxed()
    };

    let file_layer = match (config.file_output, config.log_dir.as_deref()) {
        (true, Some(log_dir)) => {
            let appender = RollingFileAppender::new(
                tracing_appender::rolling::Rotation::DAILY,
                log_dir,
                format!("{}.log", config.service_name),
            );
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);
            Some(fmt::layer().with_writer(writer).with_ansi(false).json().boxed())
        }
        _ => None,
    };

    let subscriber = Registry::default()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer);

    // Also installs the `log` bridge used by the crates that log through `log`
    subscriber.try_init().map_err(|e| {
        Error::new(ErrorKind::Configuration, format!("Failed to set global subscriber: {}", e))
    })?;

    LOGGING_INITIALIZED.store(true, Ordering::SeqCst);

    tracing::info!(
        service = %config.service_name,
        level = %config.level,
        json = %config.json_format,
        "Structured logging initialized"
    );

    Ok(())
}

/// Runs `fut` with `correlation_id` visible to [`current_correlation_id`].
pub async fn with_correlation_id<F, S>(correlation_id: S, fut: F) -> F::Output
where
    F: Future,
    S: Into<String>,
{
    CORRELATION_ID.scope(correlation_id.into(), fut).await
}

/// Retrieves the correlation id of the current task, if any
pub fn current_correlation_id() -> Option<String> {
    CORRELATION_ID.try_with(|id| id.clone()).ok()
}

/// Logs an error at the appropriate level based on its severity
pub fn log_structured_error(error: &Error) {
    use tracing::{error, warn, info};

    let correlation_id = error.correlation_id.as_deref().unwrap_or("unknown");
    let service = error.service.as_deref().unwrap_or("unknown");

    match error.severity {
        Severity::Critical | Severity::Major => {
            error!(
                error_id = %error.id,
                error_kind = %error.kind,
                correlation_id = %correlation_id,
                service = %service,
                message = %error.message,
                severity = %error.severity,
                transient = %error.transient,
                context = ?error.context,
                "Error occurred"
            );
        }
        Severity::Minor => {
            warn!(
                error_id = %error.id,
                error_kind = %error.kind,
                correlation_id = %correlation_id,
                service = %service,
                message = %error.message,
                transient = %error.transient,
                "Recoverable error occurred"
            );
        }
        Severity::Info => {
            info!(
                error_id = %error.id,
                error_kind = %error.kind,
                correlation_id = %correlation_id,
                service = %service,
                message = %error.message,
                "Informational error"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn correlation_id_follows_the_task() {
        assert_eq!(current_correlation_id(), None);

        let seen = with_correlation_id("req-42", async {
            tokio::task::yield_now().await;
            let err = Error::new(ErrorKind::Stage, "boom");
            (current_correlation_id(), err.correlation_id)
        })
        .await;

        assert_eq!(seen.0.as_deref(), Some("req-42"));
        assert_eq!(seen.1.as_deref(), Some("req-42"));
        assert_eq!(current_correlation_id(), None);
    }

    #[test]
    fn init_logging_is_idempotent() {
        assert!(init_logging(None).is_ok());
        assert!(init_logging(Some(LoggingConfig::default())).is_ok());
    }
}
