// orchestrator-service-rs/src/controller.rs
// The orchestration loop for a single request.
//
// Each iteration resolves the current stage, runs it under a timeout and
// retry budget, validates what it returned, asks the routing engine for a
// decision and applies that decision to the record. Execution per record
// is strictly sequential; independent records can run on separate tasks.

use std::sync::Arc;
use std::time::Duration;

use action_ledger::MemoryStore;
use agent_registry::{Stage, StageRegistry};
use chrono::Utc;
use data_router::RoutingTable;
use error_handling::{log_structured_error, with_correlation_id, RetryConfig, RetryPolicy, RetryResult, ServiceError};
use metrics::increment_counter;
use shared_types::{
    reasons, ControllerSettings, HandoffEntry, HistoryRole, RecordStatus, RequestRecord, RoutingDecision,
    StageExecutionError, StageId, StageOutput,
};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::checkpoint::CheckpointWriter;
use crate::error::OrchestratorError;

enum StageRun {
    Completed(StageOutput),
    Exhausted { error: StageExecutionError, attempts: usize },
    DeadlineExceeded,
}

pub struct Controller {
    registry: Arc<StageRegistry>,
    table: RoutingTable,
    store: Arc<dyn MemoryStore>,
    settings: ControllerSettings,
    retry: RetryPolicy,
}

impl Controller {
    pub fn new(
        registry: Arc<StageRegistry>,
        table: RoutingTable,
        store: Arc<dyn MemoryStore>,
        settings: ControllerSettings,
    ) -> Self {
        // All stage failures count against the same attempt budget
        let retry = RetryPolicy::new(
            "stage-execution",
            Some(RetryConfig {
                max_attempts: settings.attempt_limit.max(1),
                base_backoff: Duration::from_millis(settings.retry_base_backoff_ms),
                max_backoff: Duration::from_millis(settings.retry_max_backoff_ms.max(settings.retry_base_backoff_ms)),
                jitter_factor: settings.retry_jitter,
                retry_only_transient: false,
                record_metrics: true,
            }),
        );

        Self {
            registry,
            table,
            store,
            settings,
            retry,
        }
    }

    /// Drives `record` until a terminal decision. Returns a frozen record
    /// unless a programming or configuration defect is detected.
    pub async fn run(&self, record: RequestRecord, deadline: Option<Duration>) -> Result<RequestRecord, OrchestratorError> {
        let request_id = record.request_id().to_string();
        with_correlation_id(request_id, self.drive(record, deadline)).await
    }

    #[instrument(name = "orchestrator_run", skip(self, record, deadline), fields(request_id = %record.request_id()))]
    async fn drive(&self, record: RequestRecord, deadline: Option<Duration>) -> Result<RequestRecord, OrchestratorError> {
        if record.is_terminal() {
            debug!("Record already terminal, nothing to run");
            return Ok(record);
        }

        let rules = match record.rules_snapshot() {
            Some(snapshot) => Arc::new(snapshot.clone()),
            None => self.table.snapshot(),
        };
        let engine = self.table.engine_for(rules);
        let max_handoffs = engine.rules().max_handoffs;
        // A deadline too far out to represent is no deadline at all
        let deadline_at = deadline
            .or_else(|| self.settings.deadline())
            .and_then(|d| Instant::now().checked_add(d));

        let checkpoints = CheckpointWriter::spawn(
            Arc::clone(&self.store),
            record.request_id(),
            self.settings.checkpoint_queue,
        );

        let mut record = record;
        let outcome: Result<(), OrchestratorError> = loop {
            let current = record.current_stage().clone();

            if deadline_at.is_some_and(|at| Instant::now() >= at) {
                break self.terminate(&mut record, &current, reasons::DEADLINE_EXCEEDED, None);
            }

            let stage = match self.registry.resolve(&current) {
                Ok(stage) => stage,
                Err(e) => {
                    warn!(stage = %current, error = %e, "Stage could not be resolved");
                    break self.terminate(&mut record, &current, reasons::STAGE_UNAVAILABLE, Some(e.to_string()));
                }
            };
            if stage.id() != &current {
                break Err(OrchestratorError::StageMismatch {
                    expected: current,
                    found: stage.id().clone(),
                });
            }

            let output = match self.execute_stage(stage, &record, deadline_at).await {
                StageRun::Completed(output) => output,
                StageRun::Exhausted { error, attempts } => {
                    log_structured_error(&error.to_error());
                    let detail = format!("stage {} failed after {} attempt(s): {}", current, attempts, error.cause);
                    break self.terminate(&mut record, &current, reasons::STAGE_UNAVAILABLE, Some(detail));
                }
                StageRun::DeadlineExceeded => {
                    break self.terminate(&mut record, &current, reasons::DEADLINE_EXCEEDED, None);
                }
            };

            let StageOutput { record: next, signal } = output;
            record = next;

            let mut decision = engine.decide(&record, &signal, record.handoff_trail());
            if !decision.is_terminal() && record.handoff_trail().len() + 1 >= max_handoffs {
                // The engine reserves the last trail slot for an escalation;
                // getting here means that bound was bypassed.
                let violation = format!(
                    "{}: {} would leave no room under max_handoffs={}",
                    reasons::LOOP_SAFETY,
                    decision,
                    max_handoffs
                );
                log_structured_error(
                    &error_handling::Error::new(error_handling::ErrorKind::LoopSafety, violation.clone())
                        .service("orchestrator")
                        .severity(error_handling::Severity::Critical),
                );
                decision = RoutingDecision::Escalate(violation);
            }

            info!(
                stage = %current,
                decision = decision.kind().as_str(),
                reason = %decision.reason(),
                explanation = %engine.explain(&decision, &signal),
                "Routing decision"
            );

            if let Err(e) = apply_decision(&mut record, &current, &decision) {
                break Err(e.into());
            }
            checkpoints.submit(&record);

            if record.is_terminal() {
                break Ok(());
            }
        };

        match outcome {
            Ok(()) => {
                if !checkpoints.finish(Some(&record)).await {
                    warn!("Terminal record was not durably checkpointed");
                }
                info!(
                    status = ?record.status(),
                    stage = %record.current_stage(),
                    handoffs = record.handoff_trail().len(),
                    "Run finished"
                );
                Ok(record)
            }
            Err(e) => {
                checkpoints.finish(None).await;
                log_structured_error(&e.to_error());
                Err(e)
            }
        }
    }

    async fn execute_stage(
        &self,
        stage: Arc<dyn Stage>,
        record: &RequestRecord,
        deadline_at: Option<Instant>,
    ) -> StageRun {
        let stage_id = stage.id().clone();
        let timeout = self.settings.stage_timeout(&stage_id);
        let operation = format!("stage:{}", stage_id);

        let attempts = self.retry.retry(&operation, |attempt| {
            let stage = Arc::clone(&stage);
            let stage_id = stage_id.clone();
            let input = record.clone();
            async move {
                increment_counter!("stage_attempts_total", "stage" => stage_id.to_string());
                debug!(stage = %stage_id, attempt, "Executing stage");

                let output = match tokio::time::timeout(timeout, stage.execute(input.clone())).await {
                    Ok(result) => result?,
                    Err(_) => return Err(StageExecutionError::timeout(&stage_id, timeout)),
                };
                validate_output(&stage_id, &input, &output)?;
                Ok(output)
            }
        });

        let result = match deadline_at {
            Some(at) => match tokio::time::timeout_at(at, attempts).await {
                Ok(result) => result,
                Err(_) => return StageRun::DeadlineExceeded,
            },
            None => attempts.await,
        };

        match result {
            RetryResult::Success { value, .. } => StageRun::Completed(value),
            RetryResult::Failure { error, attempts } => StageRun::Exhausted { error, attempts },
        }
    }

    /// Ends the run with an escalation decided by the controller itself
    fn terminate(
        &self,
        record: &mut RequestRecord,
        current: &StageId,
        reason: &str,
        detail: Option<String>,
    ) -> Result<(), OrchestratorError> {
        warn!(stage = %current, reason, detail = detail.as_deref().unwrap_or(""), "Escalating run");
        if let Some(detail) = detail {
            record.append_history(current, HistoryRole::System, detail)?;
        }
        apply_decision(record, current, &RoutingDecision::Escalate(reason.to_string()))?;
        Ok(())
    }
}

fn apply_decision(
    record: &mut RequestRecord,
    current: &StageId,
    decision: &RoutingDecision,
) -> Result<(), shared_types::RecordError> {
    let to_stage = match decision {
        RoutingDecision::HandoffTo(target, _) => target.clone(),
        _ => current.clone(),
    };
    record.record_decision(HandoffEntry {
        from_stage: current.clone(),
        to_stage: to_stage.clone(),
        reason: decision.reason().to_string(),
        decision_kind: decision.kind(),
        timestamp: Utc::now(),
    })?;

    increment_counter!("routing_decisions_total", "kind" => decision.kind().as_str());
    match decision {
        RoutingDecision::ContinueCurrent => Ok(()),
        RoutingDecision::HandoffTo(..) => record.set_current_stage(to_stage),
        RoutingDecision::End(_) => record.freeze(RecordStatus::Completed),
        RoutingDecision::Escalate(reason) => {
            increment_counter!("escalations_total", "reason" => escalation_label(reason));
            record.freeze(RecordStatus::Escalated)
        }
    }
}

fn escalation_label(reason: &str) -> &'static str {
    [
        reasons::HANDOFF_LIMIT,
        reasons::HUMAN_REQUIRED,
        reasons::STAGE_UNAVAILABLE,
        reasons::DEADLINE_EXCEEDED,
        reasons::LOOP_SAFETY,
    ]
    .into_iter()
    .find(|known| reason.starts_with(known))
    .unwrap_or("other")
}

/// A stage may only extend the record: same identity, same position, same
/// trail, gap-free history with at least one new entry, and an artifact
/// that is never replaced.
fn validate_output(stage_id: &StageId, input: &RequestRecord, output: &StageOutput) -> Result<(), StageExecutionError> {
    let next = &output.record;
    let invalid = |detail: &str| Err(StageExecutionError::invalid_output(stage_id, detail));

    if next.request_id() != input.request_id() || next.raw_input() != input.raw_input() {
        return invalid("returned a different request");
    }
    if next.current_stage() != input.current_stage() {
        return invalid("changed the current stage");
    }
    if next.handoff_trail() != input.handoff_trail() {
        return invalid("modified the handoff trail");
    }
    if next.status() != RecordStatus::InFlight {
        return invalid("changed the record status");
    }
    if next.rules_snapshot() != input.rules_snapshot() {
        return invalid("replaced the routing rules snapshot");
    }
    if let Some(artifact) = input.artifact() {
        if next.artifact() != Some(artifact) {
            return invalid("replaced the artifact");
        }
    }

    next.verify_history().map_err(|e| StageExecutionError::new(stage_id, e))?;
    let before = input.history();
    if next.history().len() <= before.len() {
        return invalid("appended no history entry");
    }
    if &next.history()[..before.len()] != before {
        return invalid("rewrote existing history");
    }
    Ok(())
}
