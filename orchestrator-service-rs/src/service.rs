// orchestrator-service-rs/src/service.rs
// Caller-facing API: submit, resume and runtime rule administration.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use action_ledger::{MemoryStore, SessionSummary};
use agent_registry::StageRegistry;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use data_router::RoutingTable;
use self_improve::{optimize_routing_rules, OptimizationPolicy, PerformanceData, RuleAdjustment, RunOutcome, SelfImprover};
use serde_json::Value;
use shared_types::{EngineConfig, RequestRecord, RoutingRules, RoutingRulesUpdate};
use tracing::{info, warn};

use crate::controller::Controller;
use crate::error::OrchestratorError;

/// Per-request overrides accepted by [`Orchestrator::submit`]
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    /// Applied on top of the current rules for this request only
    pub routing: Option<RoutingRulesUpdate>,
    /// Overall deadline; falls back to `controller.deadline_ms`
    pub deadline: Option<Duration>,
    pub metadata: BTreeMap<String, Value>,
}

/// Holds a request id in the in-flight set until dropped
struct ActiveRun {
    active: Arc<DashMap<String, ()>>,
    request_id: String,
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        self.active.remove(&self.request_id);
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    controller: Arc<Controller>,
    table: RoutingTable,
    store: Arc<dyn MemoryStore>,
    improver: Option<Arc<SelfImprover>>,
    active: Arc<DashMap<String, ()>>,
}

impl Orchestrator {
    /// Validates the configuration and the routing rules against the
    /// registered stages. Nothing is checked again mid-run.
    pub fn new(
        config: &EngineConfig,
        registry: StageRegistry,
        store: Arc<dyn MemoryStore>,
    ) -> Result<Self, OrchestratorError> {
        config.validate()?;
        let table = RoutingTable::new(config.routing.clone(), registry.ids())?;
        let controller = Controller::new(
            Arc::new(registry),
            table.clone(),
            Arc::clone(&store),
            config.controller.clone(),
        );

        info!(
            stages = table.known_stages().len(),
            entry = %config.routing.entry_stage,
            attempt_limit = config.controller.attempt_limit,
            "Orchestrator ready"
        );

        Ok(Self {
            controller: Arc::new(controller),
            table,
            store,
            improver: None,
            active: Arc::new(DashMap::new()),
        })
    }

    pub fn with_self_improver(mut self, improver: Arc<SelfImprover>) -> Self {
        self.improver = Some(improver);
        self
    }

    pub fn store(&self) -> &Arc<dyn MemoryStore> {
        &self.store
    }

    /// Creates a record for `raw_input` and runs it to a terminal decision
    pub async fn submit(&self, raw_input: impl Into<String>, options: SubmitOptions) -> Result<RequestRecord, OrchestratorError> {
        let rules = match &options.routing {
            Some(update) if !update.is_empty() => self.table.preview(update)?,
            _ => (*self.table.snapshot()).clone(),
        };

        let mut record = RequestRecord::new(raw_input, rules.entry_stage.clone());
        record.set_rules_snapshot(rules)?;
        for (key, value) in options.metadata {
            record.insert_metadata(key, value)?;
        }

        let run = self.claim(record.request_id())?;
        info!(request_id = %record.request_id(), stage = %record.current_stage(), "Request submitted");
        self.spawn_run(run, record, options.deadline).await
    }

    /// Continues a request from its latest checkpoint. A terminal record is
    /// returned as stored, without running any stage. Fails with
    /// [`OrchestratorError::AlreadyRunning`] while another run of the same
    /// request is in flight.
    pub async fn resume(&self, request_id: &str) -> Result<RequestRecord, OrchestratorError> {
        let run = self.claim(request_id)?;
        let record = self.store.load_latest(request_id).await?;
        if record.is_terminal() {
            info!(request_id, status = ?record.status(), "Resume requested for a finished request");
            return Ok(record);
        }

        info!(request_id, stage = %record.current_stage(), "Resuming request");
        self.spawn_run(run, record, None).await
    }

    /// Number of requests currently being driven by this orchestrator
    pub fn active_runs(&self) -> usize {
        self.active.len()
    }

    pub async fn session_summary(&self, request_id: &str) -> Result<SessionSummary, OrchestratorError> {
        let record = self.store.load_latest(request_id).await?;
        Ok(SessionSummary::from_record(&record))
    }

    /// Rules new requests will be created with
    pub fn routing_rules(&self) -> Arc<RoutingRules> {
        self.table.snapshot()
    }

    /// Installs `update` for requests created from now on. Requests already
    /// in flight keep the rules they were created with.
    pub fn configure_routing_rules(&self, update: &RoutingRulesUpdate) -> Result<Arc<RoutingRules>, OrchestratorError> {
        Ok(self.table.configure(update)?)
    }

    /// Computes a rule adjustment from `data` and installs it when non-empty
    pub fn optimize_routing_rules(&self, data: &PerformanceData) -> Result<RuleAdjustment, OrchestratorError> {
        let rules = self.table.snapshot();
        let adjustment = match &self.improver {
            Some(improver) => improver.propose(&rules, data),
            None => optimize_routing_rules(&rules, data, &OptimizationPolicy::default()),
        };
        if !adjustment.is_empty() {
            self.table.configure(&adjustment.update)?;
        }
        Ok(adjustment)
    }

    /// Same as [`Self::optimize_routing_rules`] over every recorded outcome
    pub async fn optimize_from_outcomes(&self) -> Result<RuleAdjustment, OrchestratorError> {
        let data = match &self.improver {
            Some(improver) => improver.historical_performance().await?,
            None => PerformanceData::default(),
        };
        self.optimize_routing_rules(&data)
    }

    fn claim(&self, request_id: &str) -> Result<ActiveRun, OrchestratorError> {
        match self.active.entry(request_id.to_string()) {
            Entry::Occupied(_) => {
                warn!(request_id, "Request is already running");
                Err(OrchestratorError::AlreadyRunning(request_id.to_string()))
            }
            Entry::Vacant(slot) => {
                slot.insert(());
                Ok(ActiveRun {
                    active: Arc::clone(&self.active),
                    request_id: request_id.to_string(),
                })
            }
        }
    }

    async fn spawn_run(
        &self,
        run: ActiveRun,
        record: RequestRecord,
        deadline: Option<Duration>,
    ) -> Result<RequestRecord, OrchestratorError> {
        let this = self.clone();
        // The claim moves into the task so a dropped caller cannot release it early
        tokio::spawn(async move {
            let _run = run;
            this.run_and_learn(record, deadline).await
        })
        .await
        .map_err(|e| OrchestratorError::Join(e.to_string()))?
    }

    async fn run_and_learn(&self, record: RequestRecord, deadline: Option<Duration>) -> Result<RequestRecord, OrchestratorError> {
        let started = Instant::now();
        let record = self.controller.run(record, deadline).await?;

        let Some(improver) = &self.improver else {
            return Ok(record);
        };
        let outcome = RunOutcome::from_record(&record, started.elapsed());
        if let Err(e) = improver.record_outcome(&outcome).await {
            warn!(request_id = %record.request_id(), error = %e, "Failed to record run outcome");
        }

        if improver.enabled() && improver.live_apply() {
            let adjustment = improver.propose(&self.table.snapshot(), &improver.performance());
            if !adjustment.is_empty() {
                if let Err(e) = self.table.configure(&adjustment.update) {
                    warn!(error = %e, "Proposed routing adjustment rejected");
                }
            }
        }
        Ok(record)
    }
}
