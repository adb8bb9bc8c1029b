// agent-registry-rs/src/stage.rs
// The contract every processing stage implements

use async_trait::async_trait;
use shared_types::{RequestRecord, StageExecutionError, StageId, StageOutput};

/// One unit of processing with a stable id.
///
/// `execute` receives the record by value and returns the next version
/// together with a [`shared_types::StageSignal`]. A stage may only touch the
/// record through its stage-facing mutators (history, classification,
/// artifact, metadata) and must append at least one history entry. The
/// controller only calls a stage whose id equals `record.current_stage()`.
#[async_trait]
pub trait Stage: Send + Sync {
    fn id(&self) -> &StageId;

    /// Short human-readable description, used in logs and the catalog check
    fn description(&self) -> &str {
        ""
    }

    async fn execute(&self, record: RequestRecord) -> Result<StageOutput, StageExecutionError>;
}
