// action-ledger-rs/src/memory.rs
// Process-local store: the latest checkpoint per request, gap-free history

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use shared_types::{HistoryEntry, RequestRecord};
use tokio::sync::RwLock;

use crate::{MemoryStore, StoreError};

#[derive(Debug)]
struct Checkpoint {
    latest: RequestRecord,
    saves: usize,
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    checkpoints: RwLock<HashMap<String, Checkpoint>>,
    history: RwLock<HashMap<String, Vec<HistoryEntry>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many checkpoints were saved for `request_id`; only the latest is kept
    pub async fn checkpoint_count(&self, request_id: &str) -> usize {
        self.checkpoints
            .read()
            .await
            .get(request_id)
            .map_or(0, |checkpoint| checkpoint.saves)
    }

    pub async fn history(&self, request_id: &str) -> Vec<HistoryEntry> {
        self.history
            .read()
            .await
            .get(request_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn request_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.checkpoints.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Case-insensitive search over stored history content
    pub async fn search_history(&self, query: &str, limit: usize) -> Vec<(String, HistoryEntry)> {
        let needle = query.to_lowercase();
        let history = self.history.read().await;
        let mut hits: Vec<(String, HistoryEntry)> = history
            .iter()
            .flat_map(|(request_id, entries)| {
                entries
                    .iter()
                    .filter(|entry| entry.content.to_lowercase().contains(&needle))
                    .map(move |entry| (request_id.clone(), entry.clone()))
            })
            .collect();
        hits.sort_by(|a, b| b.1.timestamp.cmp(&a.1.timestamp));
        hits.truncate(limit);
        hits
    }

    /// Drops records whose latest checkpoint is older than `days`.
    /// Returns how many records were removed.
    pub async fn cleanup_older_than(&self, days: i64) -> usize {
        let cutoff = Utc::now() - Duration::days(days);
        let mut checkpoints = self.checkpoints.write().await;
        let stale: Vec<String> = checkpoints
            .iter()
            .filter(|(_, checkpoint)| checkpoint.latest.updated_at() < cutoff)
            .map(|(request_id, _)| request_id.clone())
            .collect();

        let mut history = self.history.write().await;
        for request_id in &stale {
            checkpoints.remove(request_id);
            history.remove(request_id);
        }
        if !stale.is_empty() {
            tracing::info!(removed = stale.len(), days, "Cleaned up old request records");
        }
        stale.len()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn save_checkpoint(&self, record: &RequestRecord) -> Result<(), StoreError> {
        let mut checkpoints = self.checkpoints.write().await;
        match checkpoints.get_mut(record.request_id()) {
            Some(checkpoint) => {
                checkpoint.latest = record.clone();
                checkpoint.saves += 1;
            }
            None => {
                checkpoints.insert(
                    record.request_id().to_string(),
                    Checkpoint {
                        latest: record.clone(),
                        saves: 1,
                    },
                );
            }
        }
        Ok(())
    }

    async fn load_latest(&self, request_id: &str) -> Result<RequestRecord, StoreError> {
        self.checkpoints
            .read()
            .await
            .get(request_id)
            .map(|checkpoint| checkpoint.latest.clone())
            .ok_or_else(|| StoreError::NotFound(request_id.to_string()))
    }

    async fn append_history_entries(&self, request_id: &str, entries: &[HistoryEntry]) -> Result<(), StoreError> {
        let mut history = self.history.write().await;
        let stored = history.entry(request_id.to_string()).or_default();
        for entry in entries {
            let expected = stored.last().map_or(1, |last| last.sequence_no + 1);
            if entry.sequence_no < expected {
                continue;
            }
            if entry.sequence_no > expected {
                return Err(StoreError::HistoryGap {
                    request_id: request_id.to_string(),
                    expected,
                    found: entry.sequence_no,
                });
            }
            stored.push(entry.clone());
        }
        Ok(())
    }
}
