//! Circuit breaker over repeated tool failures.
//!
//! The breaker is a small signed document with three phases:
//!
//! ```text
//! closed --(TRIP_THRESHOLD failures)--> tripped --(session start)--> tripped-pending-reset
//!    ^                                      |                                |
//!    +------------- user_approved_reset ----+--------------------------------+
//! ```
//!
//! Nothing but an explicit user-approved reset closes a tripped breaker. A
//! new session only marks the reset as pending.

use crate::action::ToolAction;
use crate::context::Context;
use crate::decision::{Block, Verdict};
use crate::error::WardenError;
use crate::store::{DocumentState, StateStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use warden_journal::{AuditEntry, Journal};

/// Consecutive failures that trip the breaker.
///
/// Policy choice: three strikes. Two failures are treated as noise, a third
/// of any kind means the agent should stop and ask.
pub const TRIP_THRESHOLD: u32 = 3;

/// File name of the breaker document in the state directory.
pub const BREAKER_FILE: &str = "circuit_breaker.json";

const INTEGRITY_TRIP_REASON: &str = "state integrity failure";

/// Breaker phase derived from the stored flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BreakerPhase {
    Closed,
    Tripped,
    TrippedPendingReset,
}

/// Persisted breaker document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerState {
    pub failures: u32,
    pub tripped: bool,
    pub trip_reason: Option<String>,
    pub tripped_at: Option<DateTime<Utc>>,
    pub pending_user_reset: bool,
    pub error_signatures: BTreeMap<String, u32>,
    pub session_started_while_tripped: Option<DateTime<Utc>>,
    pub reset_at: Option<DateTime<Utc>>,
}

impl BreakerState {
    pub fn phase(&self) -> BreakerPhase {
        match (self.tripped, self.pending_user_reset) {
            (false, _) => BreakerPhase::Closed,
            (true, false) => BreakerPhase::Tripped,
            (true, true) => BreakerPhase::TrippedPendingReset,
        }
    }

    /// Count a failure; trips once the count reaches [`TRIP_THRESHOLD`].
    pub fn record_failure(&mut self, signature: &str, now: DateTime<Utc>) {
        self.failures = self.failures.saturating_add(1);
        *self.error_signatures.entry(signature.to_string()).or_insert(0) += 1;
        if !self.tripped && self.failures >= TRIP_THRESHOLD {
            self.force_trip(signature, now);
        }
    }

    /// Reset the count. Only legal while closed; a no-op otherwise.
    pub fn record_success(&mut self) {
        if self.phase() == BreakerPhase::Closed {
            self.failures = 0;
        }
    }

    /// Trip regardless of the failure count.
    pub fn force_trip(&mut self, reason: &str, now: DateTime<Utc>) {
        self.tripped = true;
        self.trip_reason = Some(reason.to_string());
        self.tripped_at = Some(now);
    }

    /// A new session began. A tripped breaker stays tripped and now waits
    /// for the user; a closed breaker forgets its earlier failures.
    pub fn on_session_start(&mut self, now: DateTime<Utc>) {
        if self.tripped {
            self.pending_user_reset = true;
            self.session_started_while_tripped = Some(now);
        } else {
            self.failures = 0;
            self.error_signatures.clear();
        }
    }

    /// The only way back to closed. Returns the previous trip reason.
    pub fn user_approved_reset(&mut self, now: DateTime<Utc>) -> Option<String> {
        let previous = self.trip_reason.take();
        self.failures = 0;
        self.tripped = false;
        self.tripped_at = None;
        self.pending_user_reset = false;
        self.error_signatures.clear();
        self.session_started_while_tripped = None;
        self.reset_at = Some(now);
        previous
    }

    /// State assumed when the stored document cannot be trusted.
    fn integrity_tripped(detail: &str, now: DateTime<Utc>) -> Self {
        let mut state = Self {
            failures: TRIP_THRESHOLD,
            pending_user_reset: true,
            ..Self::default()
        };
        state.force_trip(&format!("{INTEGRITY_TRIP_REASON}: {detail}"), now);
        state
    }

    /// Signatures ordered by count, highest first.
    pub fn top_signatures(&self, limit: usize) -> Vec<(&str, u32)> {
        let mut sigs: Vec<(&str, u32)> = self
            .error_signatures
            .iter()
            .map(|(k, v)| (k.as_str(), *v))
            .collect();
        sigs.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        sigs.truncate(limit);
        sigs
    }
}

/// Breaker bound to a project's state directory.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    ctx: Context,
    store: StateStore,
    audit: Journal<AuditEntry>,
}

impl CircuitBreaker {
    pub fn new(ctx: &Context) -> Self {
        Self {
            ctx: ctx.clone(),
            store: StateStore::new(ctx.signer().clone()),
            audit: Journal::new(ctx.audit_log_path()),
        }
    }

    fn path(&self) -> std::path::PathBuf {
        self.ctx.state_file(BREAKER_FILE)
    }

    /// Raw document state, for callers that must tell "absent" from "tampered".
    pub async fn document(&self) -> Result<DocumentState<BreakerState>, WardenError> {
        self.store.load(&self.path()).await
    }

    /// Effective breaker state.
    ///
    /// Missing means closed. A document that exists but fails verification
    /// reads as tripped: tampering never opens the breaker.
    pub async fn state(&self) -> Result<BreakerState, WardenError> {
        Ok(match self.document().await? {
            DocumentState::Absent => BreakerState::default(),
            DocumentState::Trusted(state) => state,
            DocumentState::Untrusted(failure) => {
                BreakerState::integrity_tripped(&failure.to_string(), self.ctx.now())
            }
        })
    }

    pub async fn record_failure(&self, signature: &str) -> Result<BreakerState, WardenError> {
        let mut state = self.state().await?;
        let was_tripped = state.tripped;
        state.record_failure(signature, self.ctx.now());
        self.store.write_signed(&self.path(), &state).await?;

        if state.tripped && !was_tripped {
            tracing::warn!(signature, failures = state.failures, "circuit breaker tripped");
        } else {
            tracing::debug!(signature, failures = state.failures, "recorded failure");
        }
        Ok(state)
    }

    pub async fn record_success(&self) -> Result<BreakerState, WardenError> {
        let mut state = self.state().await?;
        if state.phase() != BreakerPhase::Closed || state.failures == 0 {
            return Ok(state);
        }
        state.record_success();
        self.store.write_signed(&self.path(), &state).await?;
        Ok(state)
    }

    pub async fn on_session_start(&self) -> Result<BreakerState, WardenError> {
        let document = self.document().await?;
        if matches!(document, DocumentState::Absent) {
            return Ok(BreakerState::default());
        }
        let mut state = self.state().await?;
        state.on_session_start(self.ctx.now());
        self.store.write_signed(&self.path(), &state).await?;
        if state.tripped {
            tracing::warn!(reason = ?state.trip_reason, "session started with breaker tripped");
        }
        Ok(state)
    }

    /// Close the breaker on the user's say-so and record who approved it.
    ///
    /// Callers confirm the breaker is actually tripped first.
    pub async fn user_approved_reset(&self) -> Result<Option<String>, WardenError> {
        let mut state = self.state().await?;
        let previous = state.user_approved_reset(self.ctx.now());
        self.store.write_signed(&self.path(), &state).await?;

        let reason = format!(
            "User approved breaker reset (was tripped: {})",
            previous.as_deref().unwrap_or("unknown")
        );
        self.audit
            .append(&AuditEntry::new(self.ctx.now(), "circuit_breaker", reason, "user"))
            .await?;
        tracing::info!(previous = ?previous, "circuit breaker reset by user");
        Ok(previous)
    }

    /// Block mutating actions while tripped.
    pub async fn check(&self, action: &ToolAction) -> Result<Verdict, WardenError> {
        if !action.is_mutating() {
            return Ok(Verdict::Allowed);
        }
        let state = self.state().await?;
        if !state.tripped {
            return Ok(Verdict::Allowed);
        }
        Ok(Verdict::Blocked(tripped_block(action, &state)))
    }
}

fn tripped_block(action: &ToolAction, state: &BreakerState) -> Block {
    let mut why = format!(
        "Circuit breaker is tripped after {} failures.\nTrip reason: {}",
        state.failures,
        state.trip_reason.as_deref().unwrap_or("unknown")
    );
    if let Some(at) = state.tripped_at {
        why.push_str(&format!("\nTripped at: {}", at.to_rfc3339()));
    }
    let top = state.top_signatures(3);
    if !top.is_empty() {
        let listed: Vec<String> = top.iter().map(|(sig, n)| format!("{sig} x{n}")).collect();
        why.push_str(&format!("\nRepeated errors: {}", listed.join(", ")));
    }
    Block::new(
        action.describe(),
        why,
        "Stop retrying. Investigate the failure with read-only tools, explain it to the user, \
         and ask them to say \"reset breaker\" once they approve continuing.",
    )
}
