// shared-types-rs/src/decision.rs
// Stage signals and routing decisions

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::record::{RequestRecord, StageId};

/// Reason strings attached to routing decisions. Callers match on these to
/// tell escalation causes apart.
pub mod reasons {
    pub const HANDOFF_LIMIT: &str = "handoff limit exceeded";
    pub const HUMAN_REQUIRED: &str = "explicit human-required signal";
    pub const LOW_CONFIDENCE: &str = "low confidence requires deeper analysis";
    pub const CATEGORY_RULE: &str = "category routing rule";
    pub const SELF_REPORTED: &str = "stage self-reported handoff";
    pub const ARTIFACT_PRODUCED: &str = "artifact produced";
    pub const CONTINUE: &str = "continue current stage";
    pub const STAGE_UNAVAILABLE: &str = "stage unavailable";
    pub const DEADLINE_EXCEEDED: &str = "deadline exceeded";
    pub const LOOP_SAFETY: &str = "loop safety violation";

    /// Reason for a severity-driven handoff, e.g. "critical severity"
    pub fn severity(severity: crate::record::Severity) -> String {
        format!("{} severity", severity)
    }
}

/// What a stage reports about its own execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSignal {
    pub proposed_next_stage: Option<StageId>,
    pub confidence: f64,
    pub rationale: String,
    pub requires_human: bool,
}

impl StageSignal {
    /// The stage has no opinion about where the record goes next
    pub fn stay(confidence: f64, rationale: impl Into<String>) -> Self {
        Self {
            proposed_next_stage: None,
            confidence: confidence.clamp(0.0, 1.0),
            rationale: rationale.into(),
            requires_human: false,
        }
    }

    pub fn handoff(stage: impl Into<StageId>, confidence: f64, rationale: impl Into<String>) -> Self {
        Self {
            proposed_next_stage: Some(stage.into()),
            confidence: confidence.clamp(0.0, 1.0),
            rationale: rationale.into(),
            requires_human: false,
        }
    }

    pub fn human(rationale: impl Into<String>) -> Self {
        Self {
            proposed_next_stage: None,
            confidence: 1.0,
            rationale: rationale.into(),
            requires_human: true,
        }
    }
}

/// A stage's result: the next version of the record plus its signal
#[derive(Debug, Clone)]
pub struct StageOutput {
    pub record: RequestRecord,
    pub signal: StageSignal,
}

impl StageOutput {
    pub fn new(record: RequestRecord, signal: StageSignal) -> Self {
        Self { record, signal }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    Continue,
    Handoff,
    Escalate,
    End,
}

impl DecisionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionKind::Continue => "continue",
            DecisionKind::Handoff => "handoff",
            DecisionKind::Escalate => "escalate",
            DecisionKind::End => "end",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DecisionKind::Escalate | DecisionKind::End)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingDecision {
    ContinueCurrent,
    HandoffTo(StageId, String),
    Escalate(String),
    End(String),
}

impl RoutingDecision {
    pub fn kind(&self) -> DecisionKind {
        match self {
            RoutingDecision::ContinueCurrent => DecisionKind::Continue,
            RoutingDecision::HandoffTo(..) => DecisionKind::Handoff,
            RoutingDecision::Escalate(_) => DecisionKind::Escalate,
            RoutingDecision::End(_) => DecisionKind::End,
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            RoutingDecision::ContinueCurrent => reasons::CONTINUE,
            RoutingDecision::HandoffTo(_, reason)
            | RoutingDecision::Escalate(reason)
            | RoutingDecision::End(reason) => reason,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.kind().is_terminal()
    }
}

impl fmt::Display for RoutingDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutingDecision::ContinueCurrent => write!(f, "Continue with the current stage"),
            RoutingDecision::HandoffTo(stage, reason) => write!(f, "Hand off to {}: {}", stage, reason),
            RoutingDecision::Escalate(reason) => write!(f, "Escalate to a human: {}", reason),
            RoutingDecision::End(reason) => write!(f, "Request resolved: {}", reason),
        }
    }
}
