//! # Error Handling Framework
//!
//! Shared error plumbing for the stage orchestration engine:
//!
//! - a structured [`Error`] envelope used for logging stage and store failures
//! - tracing bootstrap with request-scoped correlation ids
//! - retry policies with exponential backoff and jitter
//!

pub mod types;
pub mod logging;
pub mod retry;

// Re-export commonly used types
pub use types::{Error, Result, ErrorKind, ServiceError, Severity};
pub use logging::{
    init_logging, current_correlation_id, log_structured_error, with_correlation_id, LoggingConfig,
};
pub use retry::{RetryCategory, RetryConfig, RetryPolicy, RetryResult, RetryableError};
