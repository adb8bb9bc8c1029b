// orchestrator-service-rs/src/checkpoint.rs
// Background checkpointing for one run.
//
// Intermediate snapshots go through a bounded channel to a drain task so the
// controller never waits on storage between decisions. `finish` closes the
// channel, waits for the drain and then writes the terminal record inline.

use std::sync::Arc;

use action_ledger::{MemoryStore, StoreError};
use metrics::increment_counter;
use shared_types::{HistoryEntry, RequestRecord};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

pub(crate) struct CheckpointWriter {
    store: Arc<dyn MemoryStore>,
    request_id: String,
    tx: mpsc::Sender<RequestRecord>,
    task: JoinHandle<u64>,
}

impl CheckpointWriter {
    pub(crate) fn spawn(store: Arc<dyn MemoryStore>, request_id: &str, queue_depth: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<RequestRecord>(queue_depth.max(1));
        let task_store = Arc::clone(&store);
        let task = tokio::spawn(async move {
            // Highest history sequence number known to be stored
            let mut persisted = 0;
            while let Some(record) = rx.recv().await {
                if let Err(e) = persist(task_store.as_ref(), &record, &mut persisted).await {
                    warn!(request_id = %record.request_id(), error = %e, "Intermediate checkpoint failed");
                }
            }
            persisted
        });

        Self {
            store,
            request_id: request_id.to_string(),
            tx,
            task,
        }
    }

    /// Queues a snapshot. A full queue drops it; the next one supersedes it.
    pub(crate) fn submit(&self, record: &RequestRecord) {
        if let Err(e) = self.tx.try_send(record.clone()) {
            increment_counter!("checkpoint_dropped_total");
            debug!(request_id = %self.request_id, error = %e, "Checkpoint queue unavailable, snapshot skipped");
        }
    }

    /// Drains pending snapshots, then saves `last` and waits for the write.
    /// Returns whether the final save succeeded.
    #[instrument(name = "checkpoint_finish", skip(self, last), fields(request_id = %self.request_id))]
    pub(crate) async fn finish(self, last: Option<&RequestRecord>) -> bool {
        let CheckpointWriter { store, tx, task, .. } = self;
        drop(tx);

        let mut persisted = match task.await {
            Ok(persisted) => persisted,
            Err(e) => {
                warn!(error = %e, "Checkpoint drain task failed");
                0
            }
        };

        let Some(record) = last else {
            return false;
        };
        match persist(store.as_ref(), record, &mut persisted).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Final checkpoint failed; returning the in-memory record");
                false
            }
        }
    }
}

async fn persist(store: &dyn MemoryStore, record: &RequestRecord, persisted: &mut u64) -> Result<(), StoreError> {
    let fresh: Vec<HistoryEntry> = record
        .history()
        .iter()
        .filter(|entry| entry.sequence_no > *persisted)
        .cloned()
        .collect();

    let result = async {
        if !fresh.is_empty() {
            store.append_history_entries(record.request_id(), &fresh).await?;
        }
        store.save_checkpoint(record).await
    }
    .await;

    match &result {
        Ok(()) => {
            if let Some(last) = fresh.last() {
                *persisted = last.sequence_no;
            }
            increment_counter!("checkpoints_saved_total");
        }
        Err(_) => increment_counter!("checkpoint_failures_total"),
    }
    result
}
