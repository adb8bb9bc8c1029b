// action-ledger-rs/src/lib.rs
// Durable state for request records.
//
// - `MemoryStore`: the interface the controller checkpoints through
// - `InMemoryStore`: process-local store with history search and cleanup
// - `FileLedgerStore`: append-only file, entries encrypted at rest
//   (AES-256-GCM) and chained with SHA-256 for tamper detection

mod ledger;
mod memory;
mod summary;

use async_trait::async_trait;
use error_handling::{Error, ErrorKind, ServiceError, Severity};
use shared_types::{HistoryEntry, RequestRecord};

pub use ledger::{FileLedgerStore, LedgerConfig};
pub use memory::InMemoryStore;
pub use summary::SessionSummary;

#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Persists a full snapshot of the record
    async fn save_checkpoint(&self, record: &RequestRecord) -> Result<(), StoreError>;

    /// Most recent snapshot of `request_id`
    async fn load_latest(&self, request_id: &str) -> Result<RequestRecord, StoreError>;

    /// Appends history entries; entries already stored are skipped
    async fn append_history_entries(&self, request_id: &str, entries: &[HistoryEntry]) -> Result<(), StoreError>;
}

/// Errors produced by the stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no checkpoint for request {0}")]
    NotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] bincode::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("ledger integrity error: {0}")]
    Integrity(String),

    #[error("history gap for request {request_id}: expected {expected}, got {found}")]
    HistoryGap { request_id: String, expected: u64, found: u64 },

    #[error("storage task failed: {0}")]
    Join(String),
}

impl ServiceError for StoreError {
    fn to_error(&self) -> Error {
        let kind = match self {
            StoreError::NotFound(_) => ErrorKind::Validation,
            StoreError::Io(_) => ErrorKind::IO,
            _ => ErrorKind::Storage,
        };
        let mut error = Error::new(kind, self.to_string())
            .service("memory-store")
            .severity(self.severity());
        if self.is_transient() {
            error = error.transient();
        }
        error
    }

    fn is_transient(&self) -> bool {
        matches!(self, StoreError::Io(_) | StoreError::Join(_))
    }

    fn severity(&self) -> Severity {
        match self {
            StoreError::NotFound(_) => Severity::Minor,
            StoreError::Integrity(_) | StoreError::Crypto(_) => Severity::Critical,
            _ => Severity::Major,
        }
    }
}
