//! Journal entry types.
//!
//! Each journal file holds one entry type, one JSON object per line.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A reset or override recorded in the audit log.
///
/// Every break-glass action appends one of these so that "who approved
/// this" can always be reconstructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique entry identifier (ULID).
    pub id: String,
    pub timestamp: DateTime<Utc>,
    /// What was reset, e.g. `circuit_breaker`, `requirements`, `bypass`.
    pub reset_type: String,
    pub reason: String,
    /// Who approved the action. Always `user` for break-glass controls.
    pub actor: String,
}

impl AuditEntry {
    /// Build an entry stamped with a fresh id.
    pub fn new(
        timestamp: DateTime<Utc>,
        reset_type: impl Into<String>,
        reason: impl Into<String>,
        actor: impl Into<String>,
    ) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            timestamp,
            reset_type: reset_type.into(),
            reason: reason.into(),
            actor: actor.into(),
        }
    }
}

/// A research attempt written by the research tooling.
///
/// Warden only ever reads these; the presence of an entry for a category is
/// the proof that the category was attempted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindingEntry {
    pub category: String,
    pub tool: String,
    #[serde(default)]
    pub output_stats: String,
}

/// One analysed user prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptLogEntry {
    pub timestamp: DateTime<Utc>,
    /// Prompt text, truncated.
    pub prompt: String,
    pub triggers: Vec<String>,
    pub modifiers: Vec<String>,
    pub frustration: Vec<String>,
}

/// What kind of enforcement record this is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EnforcementKind {
    /// A rule was applied or an exception granted.
    Enforcement { action: String, details: String },
    /// A rule was violated (includes user corrections).
    Violation { reason: String },
}

/// Rule-level telemetry: enforcements and violations, for later analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnforcementEntry {
    pub timestamp: DateTime<Utc>,
    pub rule: String,
    /// Hook that produced the record.
    pub hook: String,
    #[serde(flatten)]
    pub kind: EnforcementKind,
}
