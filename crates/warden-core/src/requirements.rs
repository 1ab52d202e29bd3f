//! Requirement tracking from user prompts.
//!
//! A prompt is analysed for triggers, modifiers and frustration signals.
//! Control triggers (bypass, research skip and reset, breaker reset, status
//! queries) run their own flow and end processing; everything else is
//! merged into the signed requirement set.

use crate::breaker::{BreakerState, CircuitBreaker};
use crate::context::Context;
use crate::error::WardenError;
use crate::store::{DocumentState, StateStore};
use crate::triggers::{self, ResearchCategory, SignalDef, TriggerDef, TriggerKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use warden_journal::{
    AuditEntry, EnforcementEntry, EnforcementKind, FindingEntry, Journal, PromptLogEntry,
};

pub const REQUIREMENTS_FILE: &str = "prompt_requirements.json";
pub const USER_PATTERNS_FILE: &str = "user_patterns.json";
pub const BYPASS_FILE: &str = "bypass_active.json";
pub const RESEARCH_PROGRESS_FILE: &str = "research_progress.json";

const RESET_HELP: &str = "\
AVAILABLE RESET COMMANDS
  rb- / reset breaker   clear a tripped circuit breaker
  rb? / breaker status  show failures and error signatures
  rr- / reset research  clear research skip approvals
  s?  / bypass status   show whether enforcement is bypassed
  bypass on|off         stand enforcement down or back up
Resets are logged and do not disable enforcement.";

/// Longest prompt prefix kept in the prompt log.
const PROMPT_LOG_CHARS: usize = 500;
const HOOK_NAME: &str = "user_prompt";

/// Obligations the user's prompts have placed on the agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequirementSet {
    pub requested: BTreeSet<String>,
    pub satisfied: BTreeSet<String>,
    pub modifiers: BTreeSet<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl RequirementSet {
    /// A new task: discard what was outstanding.
    pub fn fresh_start<'a>(&mut self, triggers: impl IntoIterator<Item = &'a str>) {
        self.requested = triggers.into_iter().map(str::to_string).collect();
        self.satisfied.clear();
    }

    /// Continue the current task with extra obligations.
    pub fn add<'a>(&mut self, triggers: impl IntoIterator<Item = &'a str>) {
        self.requested.extend(triggers.into_iter().map(str::to_string));
    }

    pub fn add_modifiers<'a>(&mut self, modifiers: impl IntoIterator<Item = &'a str>) {
        self.modifiers.extend(modifiers.into_iter().map(str::to_string));
    }

    pub fn outstanding(&self) -> impl Iterator<Item = &str> {
        self.requested.difference(&self.satisfied).map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryProgress {
    pub skipped: bool,
    pub skip_reason: String,
    pub attempt_proof: String,
    pub skipped_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchProgress {
    pub categories: BTreeMap<ResearchCategory, CategoryProgress>,
}

impl ResearchProgress {
    pub fn is_skipped(&self, category: ResearchCategory) -> bool {
        self.categories.get(&category).is_some_and(|p| p.skipped)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserPatterns {
    pub corrections: u64,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Presence of a verified flag stands the whole policy layer down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BypassFlag {
    pub activated_at: DateTime<Utc>,
    pub actor: String,
}

/// Text typed by the user.
///
/// Break-glass controls only accept this type, and it is only built from
/// user-prompt events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserPrompt(String);

impl UserPrompt {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// What a prompt contains, before any state is touched.
#[derive(Debug, Clone, Default)]
pub struct PromptAnalysis {
    pub triggers: Vec<&'static TriggerDef>,
    pub modifiers: Vec<&'static SignalDef>,
    pub frustration: Vec<&'static SignalDef>,
}

impl PromptAnalysis {
    pub fn trigger_names(&self) -> Vec<&'static str> {
        self.triggers.iter().map(|t| t.name).collect()
    }

    pub fn modifier_names(&self) -> Vec<&'static str> {
        self.modifiers.iter().map(|m| m.name).collect()
    }

    pub fn frustration_names(&self) -> Vec<&'static str> {
        self.frustration.iter().map(|f| f.name).collect()
    }

    fn has(&self, kind: TriggerKind) -> bool {
        self.triggers.iter().any(|t| t.kind == kind)
    }

    pub fn is_fresh_start(&self) -> bool {
        self.has(TriggerKind::FreshStart)
    }
}

pub fn analyze_prompt(text: &str) -> PromptAnalysis {
    PromptAnalysis {
        triggers: triggers::detect_triggers(text),
        modifiers: triggers::detect_modifiers(text),
        frustration: triggers::detect_frustration(text),
    }
}

/// What processing a prompt did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptOutcome {
    /// Nothing to analyse.
    Empty,
    BypassEnabled,
    BypassDisabled,
    SkipApproved {
        category: ResearchCategory,
        proof: String,
    },
    /// The category has no attempt on record.
    SkipRejected { category: ResearchCategory },
    BreakerReset { previous: Option<String> },
    /// No breaker document exists.
    NoBreaker,
    BreakerNotTripped,
    BreakerStatus(BreakerState),
    BypassStatus { active: bool },
    ResearchReset,
    ResetHelp,
    /// Requirements merged (or nothing to merge).
    Tracked {
        fresh_start: bool,
        requirements: Option<RequirementSet>,
        corrections: Option<u64>,
    },
}

/// Analysis plus what was done with it.
#[derive(Debug, Clone)]
pub struct PromptReport {
    pub analysis: PromptAnalysis,
    pub outcome: PromptOutcome,
}

impl PromptReport {
    /// Text for the agent, if anything is worth saying.
    pub fn message(&self) -> Option<String> {
        let text = match &self.outcome {
            PromptOutcome::Empty => return None,
            PromptOutcome::BypassEnabled => {
                "BYPASS ON: enforcement disabled. Say \"bypass off\" to re-enable.".to_string()
            }
            PromptOutcome::BypassDisabled => "BYPASS OFF: enforcement re-enabled.".to_string(),
            PromptOutcome::SkipApproved { category, proof } => {
                format!("SKIP APPROVED: {} (attempted: {proof})", category.as_str())
            }
            PromptOutcome::SkipRejected { category } => format!(
                "SKIP REJECTED: {} was never attempted.\n\
                 A research category has to be tried before it can be skipped.",
                category.as_str()
            ),
            PromptOutcome::BreakerReset { previous } => format!(
                "CIRCUIT BREAKER RESET: user approved (was tripped: {}). Failure tracking cleared.",
                previous.as_deref().unwrap_or("unknown")
            ),
            PromptOutcome::NoBreaker => "No circuit breaker state found; nothing to reset.".to_string(),
            PromptOutcome::BreakerNotTripped => "Circuit breaker is not tripped; nothing to reset.".to_string(),
            PromptOutcome::BreakerStatus(state) => {
                let mut lines = vec![
                    "CIRCUIT BREAKER STATUS".to_string(),
                    format!("  Tripped: {}", state.tripped),
                    format!("  Failures: {}", state.failures),
                ];
                if let Some(reason) = &state.trip_reason {
                    lines.push(format!("  Reason: {reason}"));
                }
                if !state.error_signatures.is_empty() {
                    lines.push("  Error signatures:".to_string());
                    for (signature, count) in state.top_signatures(usize::MAX) {
                        lines.push(format!("    {signature}: {count}"));
                    }
                }
                lines.join("\n")
            }
            PromptOutcome::BypassStatus { active: true } => {
                "BYPASS: on, enforcement stood down. Say \"bypass off\" to re-enable.".to_string()
            }
            PromptOutcome::BypassStatus { active: false } => "BYPASS: off, enforcement active.".to_string(),
            PromptOutcome::ResearchReset => "RESEARCH RESET: skip approvals cleared.\n\
                 Every research category has to be covered again. This is not a bypass."
                .to_string(),
            PromptOutcome::ResetHelp => RESET_HELP.to_string(),
            PromptOutcome::Tracked { fresh_start, .. } => {
                let mut lines = Vec::new();
                if *fresh_start {
                    lines.push("FRESH START: new task detected, requirements reset.".to_string());
                }
                if !self.analysis.frustration.is_empty() {
                    lines.push("USER CORRECTION DETECTED".to_string());
                    for signal in &self.analysis.frustration {
                        lines.push(format!("  {}: {}", signal.name, signal.meaning));
                    }
                    lines.push("  Slow down and check what was missed.".to_string());
                }
                let merged: Vec<&TriggerDef> = self
                    .analysis
                    .triggers
                    .iter()
                    .copied()
                    .filter(|t| !t.kind.is_control())
                    .collect();
                if !merged.is_empty() {
                    let names: Vec<&str> = merged.iter().map(|t| t.name).collect();
                    lines.push(format!("TRIGGERS: {}", names.join(", ")));
                    for trigger in merged {
                        lines.push(format!("  {}: {}", trigger.name, trigger.action));
                    }
                    for modifier in &self.analysis.modifiers {
                        lines.push(format!("  +{}: {}", modifier.name, modifier.meaning));
                    }
                }
                if lines.is_empty() {
                    return None;
                }
                lines.join("\n")
            }
        };
        Some(text)
    }
}

/// Turns user prompts into requirement state.
#[derive(Debug, Clone)]
pub struct RequirementTracker {
    ctx: Context,
    store: StateStore,
    breaker: CircuitBreaker,
    audit: Journal<AuditEntry>,
    findings: Journal<FindingEntry>,
    prompts: Journal<PromptLogEntry>,
    enforcement: Journal<EnforcementEntry>,
}

impl RequirementTracker {
    pub fn new(ctx: &Context) -> Self {
        Self {
            ctx: ctx.clone(),
            store: StateStore::new(ctx.signer().clone()),
            breaker: CircuitBreaker::new(ctx),
            audit: Journal::new(ctx.audit_log_path()),
            findings: Journal::new(ctx.findings_log_path()),
            prompts: Journal::new(ctx.prompt_log_path()),
            enforcement: Journal::new(ctx.enforcement_log_path()),
        }
    }

    /// Whether a verified bypass flag is in place. A forged flag is ignored.
    pub async fn bypass_active(&self) -> bool {
        self.store
            .read_verified::<BypassFlag>(&self.ctx.state_file(BYPASS_FILE))
            .await
            .is_some()
    }

    pub async fn requirements(&self) -> Option<RequirementSet> {
        self.store.read_verified(&self.ctx.state_file(REQUIREMENTS_FILE)).await
    }

    pub async fn research_progress(&self) -> ResearchProgress {
        self.store
            .read_verified(&self.ctx.state_file(RESEARCH_PROGRESS_FILE))
            .await
            .unwrap_or_default()
    }

    pub async fn user_patterns(&self) -> UserPatterns {
        self.store
            .read_verified(&self.ctx.state_file(USER_PATTERNS_FILE))
            .await
            .unwrap_or_default()
    }

    pub async fn process_prompt(&self, prompt: &UserPrompt) -> Result<PromptReport, WardenError> {
        let text = prompt.as_str();
        if text.trim().is_empty() {
            return Ok(PromptReport {
                analysis: PromptAnalysis::default(),
                outcome: PromptOutcome::Empty,
            });
        }

        let analysis = analyze_prompt(text);
        self.log_prompt(text, &analysis).await?;

        let outcome = if analysis.has(TriggerKind::Bypass) {
            self.toggle_bypass(prompt).await?
        } else if let Some(outcome) = self.try_skip(prompt, &analysis).await? {
            outcome
        } else if analysis.has(TriggerKind::BreakerReset) {
            self.reset_breaker(prompt).await?
        } else if analysis.has(TriggerKind::ResearchReset) {
            self.reset_research().await?
        } else if analysis.has(TriggerKind::BreakerStatus) {
            PromptOutcome::BreakerStatus(self.breaker.state().await?)
        } else if analysis.has(TriggerKind::BypassStatus) {
            PromptOutcome::BypassStatus {
                active: self.bypass_active().await,
            }
        } else if analysis.has(TriggerKind::ResetHelp) {
            PromptOutcome::ResetHelp
        } else {
            self.track(&analysis).await?
        };

        Ok(PromptReport { analysis, outcome })
    }

    async fn log_prompt(&self, text: &str, analysis: &PromptAnalysis) -> Result<(), WardenError> {
        let entry = PromptLogEntry {
            timestamp: self.ctx.now(),
            prompt: text.chars().take(PROMPT_LOG_CHARS).collect(),
            triggers: analysis.trigger_names().into_iter().map(String::from).collect(),
            modifiers: analysis.modifier_names().into_iter().map(String::from).collect(),
            frustration: analysis.frustration_names().into_iter().map(String::from).collect(),
        };
        self.prompts.append(&entry).await?;
        Ok(())
    }

    async fn toggle_bypass(&self, prompt: &UserPrompt) -> Result<PromptOutcome, WardenError> {
        let path = self.ctx.state_file(BYPASS_FILE);
        if triggers::is_bypass_off(prompt.as_str()) {
            self.store.remove(&path).await?;
            self.audit("bypass", "User disabled bypass; enforcement re-enabled").await?;
            tracing::info!("bypass disabled by user");
            return Ok(PromptOutcome::BypassDisabled);
        }

        let flag = BypassFlag {
            activated_at: self.ctx.now(),
            actor: "user".to_string(),
        };
        self.store.write_signed(&path, &flag).await?;
        self.store.remove(&self.ctx.state_file(REQUIREMENTS_FILE)).await?;
        self.audit("bypass", "User enabled bypass; requirements cleared").await?;
        tracing::info!("bypass enabled by user");
        Ok(PromptOutcome::BypassEnabled)
    }

    /// `None` when the prompt is not a usable skip request.
    async fn try_skip(
        &self,
        prompt: &UserPrompt,
        analysis: &PromptAnalysis,
    ) -> Result<Option<PromptOutcome>, WardenError> {
        if !analysis.has(TriggerKind::SkipResearch) {
            return Ok(None);
        }
        let Some(category) = triggers::skip_category(prompt.as_str()) else {
            return Ok(None);
        };

        let attempt = self
            .findings
            .find_first(|f| ResearchCategory::parse(&f.category) == Some(category))
            .await?;
        let Some(attempt) = attempt else {
            self.record(
                "research_skip",
                EnforcementKind::Violation {
                    reason: format!("Skip of {} requested without any attempt", category.as_str()),
                },
            )
            .await?;
            tracing::warn!(category = category.as_str(), "research skip rejected: never attempted");
            return Ok(Some(PromptOutcome::SkipRejected { category }));
        };

        let proof = format!("{}: {}", attempt.tool, attempt.output_stats);
        let mut progress = self.research_progress().await;
        progress.categories.insert(
            category,
            CategoryProgress {
                skipped: true,
                skip_reason: "User approved after attempt".to_string(),
                attempt_proof: proof.clone(),
                skipped_at: Some(self.ctx.now()),
            },
        );
        self.store
            .write_signed(&self.ctx.state_file(RESEARCH_PROGRESS_FILE), &progress)
            .await?;

        let details = format!(
            "User approved skipping {} after attempt: {proof}",
            category.as_str()
        );
        self.record(
            "research_skip",
            EnforcementKind::Enforcement {
                action: "user_approved_skip".to_string(),
                details: details.clone(),
            },
        )
        .await?;
        self.audit("research_skip", details).await?;
        Ok(Some(PromptOutcome::SkipApproved { category, proof }))
    }

    /// Only a tripped breaker is reset. A document that fails verification
    /// already reads as tripped, so it can be reset too.
    async fn reset_breaker(&self, _prompt: &UserPrompt) -> Result<PromptOutcome, WardenError> {
        match self.breaker.document().await? {
            DocumentState::Absent => return Ok(PromptOutcome::NoBreaker),
            DocumentState::Trusted(state) if !state.tripped => return Ok(PromptOutcome::BreakerNotTripped),
            DocumentState::Trusted(_) | DocumentState::Untrusted(_) => {}
        }

        let previous = self.breaker.user_approved_reset().await?;
        self.record(
            "circuit_breaker",
            EnforcementKind::Enforcement {
                action: "user_approved_reset".to_string(),
                details: format!(
                    "User approved breaker reset (was tripped: {})",
                    previous.as_deref().unwrap_or("unknown")
                ),
            },
        )
        .await?;
        Ok(PromptOutcome::BreakerReset { previous })
    }

    /// Drops every skip approval. Attempts stay on record.
    async fn reset_research(&self) -> Result<PromptOutcome, WardenError> {
        self.store.remove(&self.ctx.state_file(RESEARCH_PROGRESS_FILE)).await?;
        self.record(
            "research_reset",
            EnforcementKind::Enforcement {
                action: "user_reset".to_string(),
                details: "User cleared research skip approvals".to_string(),
            },
        )
        .await?;
        self.audit("research", "User reset research requirements").await?;
        tracing::info!("research progress reset by user");
        Ok(PromptOutcome::ResearchReset)
    }

    async fn track(&self, analysis: &PromptAnalysis) -> Result<PromptOutcome, WardenError> {
        let merged: Vec<&str> = analysis
            .triggers
            .iter()
            .filter(|t| !t.kind.is_control())
            .map(|t| t.name)
            .collect();
        let fresh_start = analysis.is_fresh_start();

        let requirements = if merged.is_empty() {
            None
        } else {
            let mut reqs = self.requirements().await.unwrap_or_default();
            if fresh_start {
                reqs.fresh_start(merged.iter().copied());
            } else {
                reqs.add(merged.iter().copied());
            }
            reqs.add_modifiers(analysis.modifier_names());
            reqs.timestamp = Some(self.ctx.now());
            self.store
                .write_signed(&self.ctx.state_file(REQUIREMENTS_FILE), &reqs)
                .await?;
            tracing::debug!(fresh_start, requested = ?reqs.requested, "requirements updated");
            Some(reqs)
        };

        let corrections = if analysis.frustration.is_empty() {
            None
        } else {
            let mut patterns = self.user_patterns().await;
            patterns.corrections += 1;
            patterns.last_updated = Some(self.ctx.now());
            self.store
                .write_signed(&self.ctx.state_file(USER_PATTERNS_FILE), &patterns)
                .await?;
            self.record(
                "user_correction",
                EnforcementKind::Violation {
                    reason: format!(
                        "User correction detected: {}",
                        analysis.frustration_names().join(", ")
                    ),
                },
            )
            .await?;
            Some(patterns.corrections)
        };

        Ok(PromptOutcome::Tracked {
            fresh_start: fresh_start && requirements.is_some(),
            requirements,
            corrections,
        })
    }

    async fn audit(&self, reset_type: &str, reason: impl Into<String>) -> Result<(), WardenError> {
        self.audit
            .append(&AuditEntry::new(self.ctx.now(), reset_type, reason, "user"))
            .await?;
        Ok(())
    }

    async fn record(&self, rule: &str, kind: EnforcementKind) -> Result<(), WardenError> {
        let entry = EnforcementEntry {
            timestamp: self.ctx.now(),
            rule: rule.to_string(),
            hook: HOOK_NAME.to_string(),
            kind,
        };
        self.enforcement.append(&entry).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::{BreakerState, BREAKER_FILE, TRIP_THRESHOLD};
    use crate::context::FixedClock;
    use crate::signer::{SecretKey, Signer};
    use chrono::TimeZone;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn ctx(dir: &TempDir) -> Context {
        let signer = Signer::new(Some(SecretKey::from_hex(&"c3".repeat(32)).unwrap()));
        let now = Utc.with_ymd_and_hms(2026, 4, 1, 10, 0, 0).unwrap();
        Context::new(dir.path().join("project"), dir.path().join("home/.warden"), signer)
            .with_clock(Arc::new(FixedClock::new(now)))
    }

    async fn say(tracker: &RequirementTracker, text: &str) -> PromptReport {
        tracker.process_prompt(&UserPrompt::new(text)).await.unwrap()
    }

    #[test]
    fn test_fresh_start_replaces_and_additive_merges() {
        let mut reqs = RequirementSet::default();
        reqs.add(["A"]);
        reqs.satisfied.insert("A".to_string());

        let mut fresh = reqs.clone();
        fresh.fresh_start(["B"]);
        assert_eq!(fresh.requested, BTreeSet::from(["B".to_string()]));
        assert!(fresh.satisfied.is_empty());

        let mut additive = reqs.clone();
        additive.add(["C"]);
        assert_eq!(
            additive.requested,
            BTreeSet::from(["A".to_string(), "C".to_string()])
        );
        assert_eq!(additive.satisfied, reqs.satisfied);
        assert_eq!(additive.outstanding().collect::<Vec<_>>(), vec!["C"]);
    }

    #[tokio::test]
    async fn test_prompts_merge_requirements() {
        let dir = TempDir::new().unwrap();
        let tracker = RequirementTracker::new(&ctx(&dir));

        say(&tracker, "please explain the parser").await;
        say(&tracker, "show me the output").await;
        let reqs = tracker.requirements().await.unwrap();
        assert_eq!(reqs.requested.iter().collect::<Vec<_>>(), vec!["explain", "show"]);

        let report = say(&tracker, "ok, commit this").await;
        assert!(matches!(report.outcome, PromptOutcome::Tracked { fresh_start: true, .. }));
        let reqs = tracker.requirements().await.unwrap();
        assert_eq!(reqs.requested.iter().collect::<Vec<_>>(), vec!["commit"]);
    }

    #[tokio::test]
    async fn test_skip_without_attempt_is_rejected() {
        let dir = TempDir::new().unwrap();
        let tracker = RequirementTracker::new(&ctx(&dir));

        let report = say(&tracker, "skip web").await;
        assert_eq!(
            report.outcome,
            PromptOutcome::SkipRejected {
                category: ResearchCategory::Web
            }
        );
        assert!(report.message().unwrap().contains("never attempted"));
        assert!(!tracker.research_progress().await.is_skipped(ResearchCategory::Web));
    }

    #[tokio::test]
    async fn test_skip_after_attempt_is_approved() {
        let dir = TempDir::new().unwrap();
        let ctx = ctx(&dir);
        let tracker = RequirementTracker::new(&ctx);
        Journal::<FindingEntry>::new(ctx.findings_log_path())
            .append(&FindingEntry {
                category: "web".to_string(),
                tool: "WebSearch".to_string(),
                output_stats: "0 results".to_string(),
            })
            .await
            .unwrap();

        let report = say(&tracker, "approve skip web").await;
        assert_eq!(
            report.outcome,
            PromptOutcome::SkipApproved {
                category: ResearchCategory::Web,
                proof: "WebSearch: 0 results".to_string()
            }
        );
        assert!(tracker.research_progress().await.is_skipped(ResearchCategory::Web));

        let audit = Journal::<AuditEntry>::new(ctx.audit_log_path()).read_all().await.unwrap();
        assert_eq!(audit.last().unwrap().actor, "user");
    }

    #[tokio::test]
    async fn test_breaker_reset_flows() {
        let dir = TempDir::new().unwrap();
        let ctx = ctx(&dir);
        let tracker = RequirementTracker::new(&ctx);
        assert_eq!(say(&tracker, "reset breaker").await.outcome, PromptOutcome::NoBreaker);

        let breaker = CircuitBreaker::new(&ctx);
        breaker.record_failure("x").await.unwrap();
        assert_eq!(say(&tracker, "reset breaker").await.outcome, PromptOutcome::BreakerNotTripped);

        for _ in 1..TRIP_THRESHOLD {
            breaker.record_failure("build_timeout").await.unwrap();
        }
        let report = say(&tracker, "approve breaker reset").await;
        assert_eq!(
            report.outcome,
            PromptOutcome::BreakerReset {
                previous: Some("build_timeout".to_string())
            }
        );
        assert!(!breaker.state().await.unwrap().tripped);
    }

    #[tokio::test]
    async fn test_tampered_breaker_can_be_reset_by_user() {
        let dir = TempDir::new().unwrap();
        let ctx = ctx(&dir);
        std::fs::create_dir_all(ctx.state_dir()).unwrap();
        std::fs::write(ctx.state_file(BREAKER_FILE), b"{}").unwrap();

        let tracker = RequirementTracker::new(&ctx);
        let report = say(&tracker, "reset breaker").await;
        assert!(matches!(report.outcome, PromptOutcome::BreakerReset { .. }));
        let state: BreakerState = CircuitBreaker::new(&ctx).state().await.unwrap();
        assert!(!state.tripped);
    }

    #[tokio::test]
    async fn test_reset_research_clears_skips_and_is_audited() {
        let dir = TempDir::new().unwrap();
        let ctx = ctx(&dir);
        let tracker = RequirementTracker::new(&ctx);
        Journal::<FindingEntry>::new(ctx.findings_log_path())
            .append(&FindingEntry {
                category: "docs".to_string(),
                tool: "Read".to_string(),
                output_stats: "no match".to_string(),
            })
            .await
            .unwrap();
        say(&tracker, "skip docs").await;
        assert!(tracker.research_progress().await.is_skipped(ResearchCategory::Docs));

        let report = say(&tracker, "rr-").await;
        assert_eq!(report.outcome, PromptOutcome::ResearchReset);
        assert!(report.message().unwrap().contains("not a bypass"));
        assert!(!tracker.research_progress().await.is_skipped(ResearchCategory::Docs));
        assert!(tracker.requirements().await.is_none());

        let audit = Journal::<AuditEntry>::new(ctx.audit_log_path()).read_all().await.unwrap();
        let last = audit.last().unwrap();
        assert_eq!((last.reset_type.as_str(), last.actor.as_str()), ("research", "user"));
        let enforcement = Journal::<EnforcementEntry>::new(ctx.enforcement_log_path())
            .read_all()
            .await
            .unwrap();
        assert_eq!(enforcement.last().unwrap().rule, "research_reset");
    }

    #[tokio::test]
    async fn test_status_queries_do_not_change_state() {
        let dir = TempDir::new().unwrap();
        let ctx = ctx(&dir);
        let tracker = RequirementTracker::new(&ctx);
        let breaker = CircuitBreaker::new(&ctx);
        for _ in 0..TRIP_THRESHOLD {
            breaker.record_failure("build_failed").await.unwrap();
        }

        let report = say(&tracker, "rb?").await;
        let PromptOutcome::BreakerStatus(state) = &report.outcome else {
            panic!("expected breaker status, got {:?}", report.outcome);
        };
        assert!(state.tripped);
        let message = report.message().unwrap();
        assert!(message.contains("Tripped: true"));
        assert!(message.contains("build_failed: 3"));
        assert!(breaker.state().await.unwrap().tripped);

        assert_eq!(say(&tracker, "s?").await.outcome, PromptOutcome::BypassStatus { active: false });
        say(&tracker, "bypass on").await;
        assert_eq!(say(&tracker, "s?").await.outcome, PromptOutcome::BypassStatus { active: true });
        assert!(tracker.bypass_active().await);

        let help = say(&tracker, "reset?").await;
        assert_eq!(help.outcome, PromptOutcome::ResetHelp);
        assert!(help.message().unwrap().contains("rr- / reset research"));

        let audit = Journal::<AuditEntry>::new(ctx.audit_log_path()).read_all().await.unwrap();
        assert_eq!(audit.iter().filter(|e| e.reset_type != "bypass").count(), 0);
    }

    #[tokio::test]
    async fn test_short_breaker_reset() {
        let dir = TempDir::new().unwrap();
        let ctx = ctx(&dir);
        let breaker = CircuitBreaker::new(&ctx);
        for _ in 0..TRIP_THRESHOLD {
            breaker.record_failure("x").await.unwrap();
        }
        let report = say(&RequirementTracker::new(&ctx), "rb-").await;
        assert!(matches!(report.outcome, PromptOutcome::BreakerReset { .. }));
        assert!(!breaker.state().await.unwrap().tripped);
    }

    #[tokio::test]
    async fn test_bypass_toggle_clears_requirements() {
        let dir = TempDir::new().unwrap();
        let ctx = ctx(&dir);
        let tracker = RequirementTracker::new(&ctx);
        say(&tracker, "explain this").await;
        assert!(tracker.requirements().await.is_some());

        assert_eq!(say(&tracker, "bypass on").await.outcome, PromptOutcome::BypassEnabled);
        assert!(tracker.bypass_active().await);
        assert!(tracker.requirements().await.is_none());

        assert_eq!(say(&tracker, "bypass off").await.outcome, PromptOutcome::BypassDisabled);
        assert!(!tracker.bypass_active().await);

        let audit = Journal::<AuditEntry>::new(ctx.audit_log_path()).read_all().await.unwrap();
        assert_eq!(audit.len(), 2);
        assert!(audit.iter().all(|e| e.actor == "user" && e.reset_type == "bypass"));
    }

    #[tokio::test]
    async fn test_forged_bypass_flag_is_ignored() {
        let dir = TempDir::new().unwrap();
        let ctx = ctx(&dir);
        std::fs::create_dir_all(ctx.state_dir()).unwrap();
        std::fs::write(
            ctx.state_file(BYPASS_FILE),
            r#"{"payload":{"activated_at":"2026-04-01T10:00:00Z","actor":"user"},"signature":"00"}"#,
        )
        .unwrap();
        assert!(!RequirementTracker::new(&ctx).bypass_active().await);
    }

    #[tokio::test]
    async fn test_frustration_counts_and_prompt_log_truncates() {
        let dir = TempDir::new().unwrap();
        let ctx = ctx(&dir);
        let tracker = RequirementTracker::new(&ctx);

        let long = format!("no, I said {}", "x".repeat(900));
        let report = say(&tracker, &long).await;
        assert!(matches!(
            report.outcome,
            PromptOutcome::Tracked {
                corrections: Some(1),
                ..
            }
        ));
        say(&tracker, "are you sure?").await;
        assert_eq!(tracker.user_patterns().await.corrections, 2);

        let log = Journal::<PromptLogEntry>::new(ctx.prompt_log_path()).read_all().await.unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].prompt.chars().count(), PROMPT_LOG_CHARS);
        assert_eq!(log[0].frustration, vec!["correction"]);
    }

    #[tokio::test]
    async fn test_empty_prompt_does_nothing() {
        let dir = TempDir::new().unwrap();
        let ctx = ctx(&dir);
        let report = say(&RequirementTracker::new(&ctx), "   ").await;
        assert_eq!(report.outcome, PromptOutcome::Empty);
        assert!(report.message().is_none());
        assert!(!ctx.prompt_log_path().exists());
    }
}
