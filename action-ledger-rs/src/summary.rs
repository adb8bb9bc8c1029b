// action-ledger-rs/src/summary.rs

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use shared_types::{HistoryEntry, RecordStatus, RequestRecord, StageId};

const RECENT_ENTRIES: usize = 5;

/// Condensed view of one request, for operators and status endpoints
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub request_id: String,
    pub status: RecordStatus,
    pub current_stage: StageId,
    pub total_entries: usize,
    pub messages_per_stage: BTreeMap<StageId, usize>,
    pub handoffs: usize,
    pub recent: Vec<HistoryEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionSummary {
    pub fn from_record(record: &RequestRecord) -> Self {
        let mut messages_per_stage = BTreeMap::new();
        for entry in record.history() {
            *messages_per_stage.entry(entry.stage_id.clone()).or_insert(0) += 1;
        }

        let history = record.history();
        let recent = history[history.len().saturating_sub(RECENT_ENTRIES)..].to_vec();

        Self {
            request_id: record.request_id().to_string(),
            status: record.status(),
            current_stage: record.current_stage().clone(),
            total_entries: history.len(),
            messages_per_stage,
            handoffs: record
                .handoff_trail()
                .iter()
                .filter(|entry| entry.from_stage != entry.to_stage)
                .count(),
            recent,
            created_at: record.created_at(),
            updated_at: record.updated_at(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::HistoryRole;

    #[test]
    fn summarises_recent_history_per_stage() {
        let intake = StageId::from("receptionist");
        let analysis = StageId::from("problem_analyst");
        let mut record = RequestRecord::new("slow dashboard", intake.clone());
        for i in 0..4 {
            record.append_history(&intake, HistoryRole::Stage, format!("intake {}", i)).unwrap();
        }
        for i in 0..3 {
            record.append_history(&analysis, HistoryRole::Stage, format!("analysis {}", i)).unwrap();
        }

        let summary = SessionSummary::from_record(&record);
        assert_eq!(summary.total_entries, 7);
        assert_eq!(summary.messages_per_stage[&intake], 4);
        assert_eq!(summary.messages_per_stage[&analysis], 3);
        assert_eq!(summary.recent.len(), 5);
        assert_eq!(summary.recent[0].sequence_no, 3);
        assert_eq!(summary.handoffs, 0);
    }
}
