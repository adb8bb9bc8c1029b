// shared-types-rs/src/lib.rs
// Types shared by every crate of the stage orchestration engine

pub mod config;
pub mod decision;
pub mod errors;
pub mod record;

pub use config::{
    ControllerSettings, EngineConfig, LlmSettings, RoutingRules, RoutingRulesUpdate, SelfImproveSettings,
    StorageSettings, StoreBackend,
};
pub use decision::{reasons, DecisionKind, RoutingDecision, StageOutput, StageSignal};
pub use errors::{ConfigurationError, ExternalServiceError, RecordError, StageExecutionError, StageFailure};
pub use record::{
    Artifact, Classification, HandoffEntry, HistoryEntry, HistoryRole, RecordStatus, RequestRecord, Severity,
    StageId,
};
