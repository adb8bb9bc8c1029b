// shared-types-rs/src/record.rs
// RequestRecord: the single state object that flows through every stage

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::RoutingRules;
use crate::decision::DecisionKind;
use crate::errors::RecordError;

/// Identifier of a stage in the registry
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageId(String);

impl StageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StageId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for StageId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(RecordError::InvalidSeverity(other.to_string())),
        }
    }
}

fn check_confidence(value: f64) -> Result<f64, RecordError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(RecordError::InvalidConfidence(value))
    }
}

/// Outcome of triaging the raw input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    category: String,
    severity: Severity,
    #[serde(default)]
    keywords: Vec<String>,
    confidence: f64,
    #[serde(default)]
    recommended_stage: Option<StageId>,
    #[serde(default)]
    summary: Option<String>,
}

impl Classification {
    /// Category is normalised to lowercase; confidence must lie in [0, 1].
    pub fn new(category: impl AsRef<str>, severity: Severity, confidence: f64) -> Result<Self, RecordError> {
        let category = category.as_ref().trim().to_lowercase();
        if category.is_empty() {
            return Err(RecordError::EmptyCategory);
        }
        Ok(Self {
            category,
            severity,
            keywords: Vec::new(),
            confidence: check_confidence(confidence)?,
            recommended_stage: None,
            summary: None,
        })
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_recommended_stage(mut self, stage: impl Into<StageId>) -> Self {
        self.recommended_stage = Some(stage.into());
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn recommended_stage(&self) -> Option<&StageId> {
        self.recommended_stage.as_ref()
    }

    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }
}

/// Resolution plan produced by the terminal stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub solution_type: String,
    pub steps: Vec<String>,
    #[serde(default)]
    pub resources: Vec<String>,
    confidence: f64,
    #[serde(default)]
    pub estimated_effort: Option<String>,
    #[serde(default)]
    pub follow_up_required: bool,
}

impl Artifact {
    pub fn new(solution_type: impl Into<String>, steps: Vec<String>, confidence: f64) -> Result<Self, RecordError> {
        Ok(Self {
            solution_type: solution_type.into(),
            steps,
            resources: Vec::new(),
            confidence: check_confidence(confidence)?,
            estimated_effort: None,
            follow_up_required: false,
        })
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty() && self.solution_type.trim().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryRole {
    /// Text from the requester
    User,
    /// A stage's response
    Stage,
    /// A stage announcing a transfer
    Handoff,
    /// Notices from the engine itself
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub sequence_no: u64,
    pub stage_id: StageId,
    pub role: HistoryRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// One routing decision applied to the record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffEntry {
    pub from_stage: StageId,
    pub to_stage: StageId,
    pub reason: String,
    pub decision_kind: DecisionKind,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    InFlight,
    Completed,
    Escalated,
}

/// Mutable state of one request. Stages receive it by value and hand back
/// the next version; the controller alone moves `current_stage`, appends to
/// the trail and freezes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    request_id: String,
    raw_input: String,
    classification: Option<Classification>,
    artifact: Option<Artifact>,
    history: Vec<HistoryEntry>,
    current_stage: StageId,
    handoff_trail: Vec<HandoffEntry>,
    #[serde(default)]
    metadata: serde_json::Map<String, serde_json::Value>,
    status: RecordStatus,
    #[serde(default)]
    rules_snapshot: Option<RoutingRules>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl RequestRecord {
    pub fn new(raw_input: impl Into<String>, entry_stage: StageId) -> Self {
        let now = Utc::now();
        Self {
            request_id: Uuid::new_v4().to_string(),
            raw_input: raw_input.into(),
            classification: None,
            artifact: None,
            history: Vec::new(),
            current_stage: entry_stage,
            handoff_trail: Vec::new(),
            metadata: serde_json::Map::new(),
            status: RecordStatus::InFlight,
            rules_snapshot: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn raw_input(&self) -> &str {
        &self.raw_input
    }

    pub fn classification(&self) -> Option<&Classification> {
        self.classification.as_ref()
    }

    pub fn artifact(&self) -> Option<&Artifact> {
        self.artifact.as_ref()
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn current_stage(&self) -> &StageId {
        &self.current_stage
    }

    pub fn handoff_trail(&self) -> &[HandoffEntry] {
        &self.handoff_trail
    }

    pub fn metadata(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.metadata
    }

    pub fn status(&self) -> RecordStatus {
        self.status
    }

    pub fn rules_snapshot(&self) -> Option<&RoutingRules> {
        self.rules_snapshot.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_terminal(&self) -> bool {
        self.status != RecordStatus::InFlight
    }

    /// Sequence number the next history entry will receive
    pub fn next_sequence_no(&self) -> u64 {
        self.history.last().map_or(1, |entry| entry.sequence_no + 1)
    }

    fn ensure_open(&self) -> Result<(), RecordError> {
        if self.is_terminal() {
            Err(RecordError::Frozen(self.request_id.clone()))
        } else {
            Ok(())
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Appends a history entry and returns its sequence number
    pub fn append_history(
        &mut self,
        stage_id: &StageId,
        role: HistoryRole,
        content: impl Into<String>,
    ) -> Result<u64, RecordError> {
        self.ensure_open()?;
        let sequence_no = self.next_sequence_no();
        self.history.push(HistoryEntry {
            sequence_no,
            stage_id: stage_id.clone(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
        });
        self.touch();
        Ok(sequence_no)
    }

    pub fn set_classification(&mut self, classification: Classification) -> Result<(), RecordError> {
        self.ensure_open()?;
        self.classification = Some(classification);
        self.touch();
        Ok(())
    }

    /// The artifact can be set once per record
    pub fn set_artifact(&mut self, artifact: Artifact) -> Result<(), RecordError> {
        self.ensure_open()?;
        if self.artifact.is_some() {
            return Err(RecordError::ArtifactAlreadySet(self.request_id.clone()));
        }
        self.artifact = Some(artifact);
        self.touch();
        Ok(())
    }

    pub fn insert_metadata(
        &mut self,
        key: impl Into<String>,
        value: serde_json::Value,
    ) -> Result<Option<serde_json::Value>, RecordError> {
        self.ensure_open()?;
        let previous = self.metadata.insert(key.into(), value);
        self.touch();
        Ok(previous)
    }

    pub fn set_rules_snapshot(&mut self, rules: RoutingRules) -> Result<(), RecordError> {
        self.ensure_open()?;
        self.rules_snapshot = Some(rules);
        Ok(())
    }

    /// Appends a routing decision to the trail
    pub fn record_decision(&mut self, entry: HandoffEntry) -> Result<(), RecordError> {
        self.ensure_open()?;
        self.handoff_trail.push(entry);
        self.touch();
        Ok(())
    }

    pub fn set_current_stage(&mut self, stage: StageId) -> Result<(), RecordError> {
        self.ensure_open()?;
        self.current_stage = stage;
        self.touch();
        Ok(())
    }

    /// Moves the record into a terminal status. Every mutator fails afterwards.
    pub fn freeze(&mut self, status: RecordStatus) -> Result<(), RecordError> {
        self.ensure_open()?;
        if status == RecordStatus::InFlight {
            return Err(RecordError::InvalidTransition);
        }
        self.status = status;
        self.touch();
        Ok(())
    }

    /// Sequence numbers must run 1, 2, 3, ... without gaps
    pub fn verify_history(&self) -> Result<(), RecordError> {
        for (index, entry) in self.history.iter().enumerate() {
            let expected = index as u64 + 1;
            if entry.sequence_no != expected {
                return Err(RecordError::HistoryGap {
                    expected,
                    found: entry.sequence_no,
                });
            }
        }
        Ok(())
    }
}
