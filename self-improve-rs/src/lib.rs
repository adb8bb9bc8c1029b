// self-improve-rs/src/lib.rs
// Feedback loop for routing: finished runs are counted per category, and
// the counts can be turned into a proposed routing rule update.
//
// Nothing here runs on a request's hot path except `record_outcome`, which
// only bumps atomic counters and appends one line to the outcome file.

use std::sync::Arc;

use shared_types::{RoutingRules, SelfImproveSettings};
use tracing::instrument;

mod adaptation;
mod outcome;
mod repository;

#[cfg(test)]
mod tests;

pub use adaptation::{optimize_routing_rules, OptimizationPolicy, RuleAdjustment};
pub use outcome::{CategoryPerformance, OutcomeRecorder, PerformanceData, RunOutcome, UNCLASSIFIED};
pub use repository::{FileBackedRepository, OutcomeRepository, RepositoryError, DEFAULT_STORE_PATH};

pub type Result<T> = std::result::Result<T, SelfImproveError>;

#[derive(Debug, thiserror::Error)]
pub enum SelfImproveError {
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

pub struct SelfImprover {
    settings: SelfImproveSettings,
    recorder: OutcomeRecorder,
    repo: Option<Arc<dyn OutcomeRepository>>,
}

impl SelfImprover {
    /// Outcomes are persisted only when `store_path` is set
    pub fn new(settings: SelfImproveSettings) -> Result<Self> {
        let repo: Option<Arc<dyn OutcomeRepository>> = match &settings.store_path {
            Some(path) => Some(Arc::new(FileBackedRepository::new(path)?)),
            None => None,
        };
        Ok(Self {
            settings,
            recorder: OutcomeRecorder::new(),
            repo,
        })
    }

    pub fn with_repository(mut self, repo: Arc<dyn OutcomeRepository>) -> Self {
        self.repo = Some(repo);
        self
    }

    pub fn enabled(&self) -> bool {
        self.settings.enabled
    }

    /// Whether proposed adjustments should be installed without review
    pub fn live_apply(&self) -> bool {
        self.settings.live_apply
    }

    pub fn policy(&self) -> OptimizationPolicy {
        OptimizationPolicy::from(&self.settings)
    }

    pub fn recorder(&self) -> &OutcomeRecorder {
        &self.recorder
    }

    #[instrument(
        name = "self_improve_record_outcome",
        skip(self, outcome),
        fields(request_id = %outcome.request_id, category = %outcome.category)
    )]
    pub async fn record_outcome(&self, outcome: &RunOutcome) -> Result<()> {
        if !self.settings.enabled {
            tracing::debug!("Self-improvement disabled; outcome not recorded");
            return Ok(());
        }

        self.recorder.record(outcome);
        metrics::increment_counter!("self_improve_outcomes_total", "category" => outcome.category.clone());

        if let Some(repo) = &self.repo {
            repo.insert(outcome).await?;
        }
        Ok(())
    }

    /// Live counters since this process started
    pub fn performance(&self) -> PerformanceData {
        self.recorder.snapshot()
    }

    /// Everything the outcome file holds, including earlier processes
    pub async fn historical_performance(&self) -> Result<PerformanceData> {
        match &self.repo {
            Some(repo) => Ok(PerformanceData::from_outcomes(&repo.all().await?)),
            None => Ok(self.performance()),
        }
    }

    pub fn propose(&self, rules: &RoutingRules, data: &PerformanceData) -> RuleAdjustment {
        let adjustment = optimize_routing_rules(rules, data, &self.policy());
        if adjustment.is_empty() {
            tracing::debug!(runs = data.total_runs(), "No routing adjustment proposed");
        } else {
            metrics::increment_counter!("self_improve_adjustments_total");
            for note in &adjustment.notes {
                tracing::info!(live_apply = self.settings.live_apply, "Routing adjustment proposed: {}", note);
            }
        }
        adjustment
    }
}
