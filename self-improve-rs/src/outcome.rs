// self-improve-rs/src/outcome.rs
// Per-run outcomes and the lock-free per-category counters they feed.
//
// Several controllers finish runs concurrently, so the counters are plain
// atomics behind a concurrent map: recording never blocks a run.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use shared_types::{DecisionKind, RecordStatus, RequestRecord, StageId};
use uuid::Uuid;

pub const UNCLASSIFIED: &str = "unclassified";

/// What happened to one request, captured once its record is frozen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub id: String,
    pub request_id: String,
    pub category: String,
    pub status: RecordStatus,
    pub final_stage: StageId,
    pub handoffs: u64,
    pub escalation_reason: Option<String>,
    pub duration_ms: u64,
    pub recorded_at: DateTime<Utc>,
}

impl RunOutcome {
    pub fn from_record(record: &RequestRecord, duration: Duration) -> Self {
        let category = record
            .classification()
            .map(|c| c.category().to_string())
            .unwrap_or_else(|| UNCLASSIFIED.to_string());

        let trail = record.handoff_trail();
        let escalation_reason = trail
            .last()
            .filter(|entry| entry.decision_kind == DecisionKind::Escalate)
            .map(|entry| entry.reason.clone());

        Self {
            id: Uuid::new_v4().to_string(),
            request_id: record.request_id().to_string(),
            category,
            status: record.status(),
            final_stage: record.current_stage().clone(),
            handoffs: trail
                .iter()
                .filter(|entry| entry.decision_kind == DecisionKind::Handoff)
                .count() as u64,
            escalation_reason,
            duration_ms: duration.as_millis() as u64,
            recorded_at: Utc::now(),
        }
    }

    pub fn resolved(&self) -> bool {
        self.status == RecordStatus::Completed
    }

    pub fn escalated(&self) -> bool {
        self.status == RecordStatus::Escalated
    }
}

#[derive(Debug, Default)]
struct CategoryStats {
    runs: AtomicU64,
    resolved: AtomicU64,
    escalated: AtomicU64,
    handoffs: AtomicU64,
    duration_ms: AtomicU64,
}

impl CategoryStats {
    fn add(&self, outcome: &RunOutcome) {
        self.runs.fetch_add(1, Ordering::Relaxed);
        if outcome.resolved() {
            self.resolved.fetch_add(1, Ordering::Relaxed);
        }
        if outcome.escalated() {
            self.escalated.fetch_add(1, Ordering::Relaxed);
        }
        self.handoffs.fetch_add(outcome.handoffs, Ordering::Relaxed);
        self.duration_ms.fetch_add(outcome.duration_ms, Ordering::Relaxed);
    }

    fn performance(&self) -> CategoryPerformance {
        CategoryPerformance::from_totals(
            self.runs.load(Ordering::Relaxed),
            self.resolved.load(Ordering::Relaxed),
            self.escalated.load(Ordering::Relaxed),
            self.handoffs.load(Ordering::Relaxed),
            self.duration_ms.load(Ordering::Relaxed),
        )
    }
}

#[derive(Debug, Default, Clone)]
pub struct OutcomeRecorder {
    categories: Arc<DashMap<String, Arc<CategoryStats>>>,
}

impl OutcomeRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, outcome: &RunOutcome) {
        let stats = match self.categories.get(&outcome.category) {
            Some(existing) => Arc::clone(existing.value()),
            None => Arc::clone(self.categories.entry(outcome.category.clone()).or_default().value()),
        };
        stats.add(outcome);
    }

    pub fn total_runs(&self) -> u64 {
        self.categories
            .iter()
            .map(|entry| entry.value().runs.load(Ordering::Relaxed))
            .sum()
    }

    pub fn snapshot(&self) -> PerformanceData {
        let categories = self
            .categories
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().performance()))
            .collect();
        PerformanceData { categories }
    }
}

/// Aggregated results for one category
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryPerformance {
    pub runs: u64,
    pub success_rate: f64,
    pub escalation_rate: f64,
    pub avg_handoffs: f64,
    pub avg_resolution_ms: f64,
}

impl CategoryPerformance {
    fn from_totals(runs: u64, resolved: u64, escalated: u64, handoffs: u64, duration_ms: u64) -> Self {
        if runs == 0 {
            return Self::default();
        }
        let n = runs as f64;
        Self {
            runs,
            success_rate: resolved as f64 / n,
            escalation_rate: escalated as f64 / n,
            avg_handoffs: handoffs as f64 / n,
            avg_resolution_ms: duration_ms as f64 / n,
        }
    }
}

/// Snapshot handed to the optimizer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceData {
    pub categories: BTreeMap<String, CategoryPerformance>,
}

impl PerformanceData {
    /// Aggregates persisted outcomes, e.g. read back from the outcome file
    pub fn from_outcomes(outcomes: &[RunOutcome]) -> Self {
        let recorder = OutcomeRecorder::new();
        for outcome in outcomes {
            recorder.record(outcome);
        }
        recorder.snapshot()
    }

    pub fn total_runs(&self) -> u64 {
        self.categories.values().map(|c| c.runs).sum()
    }

    /// Run-weighted averages over every category:
    /// (success rate, escalation rate, average handoffs)
    pub fn overall(&self) -> (f64, f64, f64) {
        let total = self.total_runs();
        if total == 0 {
            return (0.0, 0.0, 0.0);
        }
        let n = total as f64;
        let weighted = |f: fn(&CategoryPerformance) -> f64| {
            self.categories.values().map(|c| f(c) * c.runs as f64).sum::<f64>() / n
        };
        (
            weighted(|c| c.success_rate),
            weighted(|c| c.escalation_rate),
            weighted(|c| c.avg_handoffs),
        )
    }
}
