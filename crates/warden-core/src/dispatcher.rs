//! Composition root: routes each hook event to the checkers that govern it.
//!
//! Checkers run most-fundamental first (self-protection, breaker, startup
//! gate, release clearance) and the first block wins. A checker that fails
//! with an error produces a block naming the subsystem; nothing fails open.

use crate::action::{ToolAction, ToolEvent};
use crate::breaker::{BreakerState, CircuitBreaker};
use crate::clearance::{ClearanceVerdict, ReleaseClearance, ReleaseMatcher};
use crate::config::{Config, ProjectManifest};
use crate::context::{Context, MANIFEST_FILE, PROJECT_WARDEN_DIR};
use crate::decision::{Block, Decision, Verdict};
use crate::error::WardenError;
use crate::failure::{outcome_from_response, ToolOutcome};
use crate::gate::{GateState, StartupGate};
use crate::protect::SelfProtection;
use crate::requirements::{PromptReport, RequirementTracker, UserPrompt};
use crate::revision::RevisionProbe;
use std::path::Path;
use std::sync::Arc;
use warden_journal::{EnforcementEntry, EnforcementKind, Journal};

const STATE_GITIGNORE: &str = "# warden session state; never commit\n*\n";

/// What session start found and did.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub breaker: BreakerState,
    /// Present for governed projects.
    pub gate: Option<GateState>,
}

impl SessionReport {
    pub fn message(&self) -> Option<String> {
        if !self.breaker.tripped {
            return None;
        }
        let mut text = String::from("CIRCUIT BREAKER STILL TRIPPED");
        if let Some(at) = self.breaker.tripped_at {
            text.push_str(&format!("\n   Tripped at: {}", at.to_rfc3339()));
        }
        text.push_str(&format!(
            "\n   Reason: {}\n\n   Say \"reset breaker\" or \"approve breaker reset\" to clear.",
            self.breaker.trip_reason.as_deref().unwrap_or("unknown")
        ));
        Some(text)
    }
}

pub struct PolicyDispatcher {
    ctx: Context,
    config: Config,
    probe: Arc<dyn RevisionProbe>,
    breaker: CircuitBreaker,
    tracker: RequirementTracker,
    clearance: ReleaseClearance,
    protection: SelfProtection,
    enforcement: Journal<EnforcementEntry>,
}

impl PolicyDispatcher {
    pub fn new(ctx: Context, config: Config, probe: Arc<dyn RevisionProbe>) -> Self {
        Self {
            breaker: CircuitBreaker::new(&ctx),
            tracker: RequirementTracker::new(&ctx),
            clearance: ReleaseClearance::new(&ctx),
            protection: SelfProtection::new(&ctx),
            enforcement: Journal::new(ctx.enforcement_log_path()),
            ctx,
            config,
            probe,
        }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Decide whether the tool call in `event` may run.
    pub async fn pre_tool_use(&self, event: &ToolEvent) -> Decision {
        let action = match event.action() {
            Ok(action) => action,
            Err(e) => {
                let block = Block::new(
                    if event.tool_name.is_empty() { "tool call" } else { event.tool_name.as_str() },
                    format!("The event could not be evaluated: {e}"),
                    "Retry the tool call with all required input fields.",
                );
                self.record_block("invalid_event", &block).await;
                return Decision::block(&block);
            }
        };

        // Self-protection holds even while bypass is active.
        if let Verdict::Blocked(block) = self.protection.check(&action) {
            self.record_block("self_protection", &block).await;
            return Decision::block(&block);
        }

        if self.tracker.bypass_active().await {
            tracing::debug!(tool = action.tool_name(), "bypass active; allowing");
            return Decision::allow();
        }

        match self.evaluate(&action).await {
            Ok(None) => Decision::allow(),
            Ok(Some((rule, block))) => {
                self.record_block(rule, &block).await;
                Decision::block(&block)
            }
            Err((rule, e)) => {
                tracing::warn!(rule, error = %e, "checker failed; blocking");
                let block = Block::new(
                    action.describe(),
                    format!("The {rule} check could not run: {e}"),
                    "Fix the underlying problem (state directory permissions, signing key, \
                     configuration), or ask the user to run `warden status`.",
                );
                self.record_block(rule, &block).await;
                Decision::block(&block)
            }
        }
    }

    async fn evaluate(
        &self,
        action: &ToolAction,
    ) -> Result<Option<(&'static str, Block)>, (&'static str, WardenError)> {
        if let Verdict::Blocked(block) = self.breaker.check(action).await.map_err(|e| ("circuit_breaker", e))? {
            return Ok(Some(("circuit_breaker", block)));
        }

        let governed = self.governed().await.map_err(|e| ("startup_gate", e))?;
        if governed {
            let gate = StartupGate::new(&self.ctx, &self.config).map_err(|e| ("startup_gate", e))?;
            let verdict = gate.check_gate(action).await.map_err(|e| ("startup_gate", e))?;
            if let Some(block) = verdict.to_block(action) {
                return Ok(Some(("startup_gate", block)));
            }
        }

        if let ToolAction::Bash { command } = action {
            if let Some(block) = self
                .check_release(action, command)
                .await
                .map_err(|e| ("release_clearance", e))?
            {
                return Ok(Some(("release_clearance", block)));
            }
        }

        Ok(None)
    }

    async fn governed(&self) -> Result<bool, WardenError> {
        Ok(ProjectManifest::load(&self.ctx.manifest_path()).await?.is_some())
    }

    async fn check_release(&self, action: &ToolAction, command: &str) -> Result<Option<Block>, WardenError> {
        let matcher = ReleaseMatcher::new(&self.config)?;
        let Some(invocation) = matcher.detect(command) else {
            return Ok(None);
        };

        let project_dir = match &invocation.project {
            Some(dir) => self.ctx.resolve(dir),
            None => self.ctx.project_dir().to_path_buf(),
        };
        let manifest_path = project_dir.join(PROJECT_WARDEN_DIR).join(MANIFEST_FILE);
        let Some(manifest) = ProjectManifest::load(&manifest_path).await? else {
            return Ok(None);
        };
        let Some(app) = manifest.app() else {
            return Ok(Some(Block::new(
                action.describe(),
                format!("Cannot determine the app name from {}", manifest_path.display()),
                "Add an \"app\" field to the project manifest.",
            )));
        };

        match self.clearance.check_current(app, &project_dir, self.probe.as_ref()).await? {
            ClearanceVerdict::Allowed(_) => Ok(None),
            ClearanceVerdict::Blocked(reason) => Ok(Some(reason.to_block(app, action.describe()))),
        }
    }

    /// Feed a finished tool call into the breaker and the startup gate.
    ///
    /// Returns advisory text for the agent, if any.
    pub async fn post_tool_use(&self, event: &ToolEvent) -> Result<Option<String>, WardenError> {
        let Ok(action) = event.action() else {
            return Ok(None);
        };
        if self.tracker.bypass_active().await {
            return Ok(None);
        }

        let outcome = event
            .tool_response
            .as_ref()
            .map(outcome_from_response)
            .unwrap_or_else(ToolOutcome::success);

        let mut message = None;
        if action.is_mutating() {
            if outcome.failed {
                let before = self.breaker.state().await?.tripped;
                let state = self.breaker.record_failure(&outcome.signature()).await?;
                if state.tripped && !before {
                    message = Some(format!(
                        "CIRCUIT BREAKER TRIPPED after {} failures ({}). Mutating tools are blocked \
                         until the user says \"reset breaker\".",
                        state.failures,
                        state.trip_reason.as_deref().unwrap_or("unknown")
                    ));
                }
            } else {
                self.breaker.record_success().await?;
            }
        }

        if !outcome.failed && self.governed().await? {
            StartupGate::new(&self.ctx, &self.config)?.observe(&action).await?;
        }
        Ok(message)
    }

    /// Process text the user typed.
    pub async fn user_prompt(&self, prompt: &UserPrompt) -> Result<PromptReport, WardenError> {
        self.tracker.process_prompt(prompt).await
    }

    /// Prepare state for a new session.
    pub async fn session_start(&self) -> Result<SessionReport, WardenError> {
        ensure_state_dir(&self.ctx.state_dir()).await?;

        let breaker = self.breaker.on_session_start().await?;
        let gate = if self.governed().await? {
            Some(StartupGate::new(&self.ctx, &self.config)?.initialize().await?)
        } else {
            None
        };
        tracing::debug!(tripped = breaker.tripped, governed = gate.is_some(), "session started");
        Ok(SessionReport { breaker, gate })
    }

    async fn record_block(&self, rule: &str, block: &Block) {
        tracing::warn!(rule, what = %block.what, "blocked");
        let entry = EnforcementEntry {
            timestamp: self.ctx.now(),
            rule: rule.to_string(),
            hook: "pre_tool_use".to_string(),
            kind: EnforcementKind::Violation {
                reason: format!("{}: {}", block.what, block.why.lines().next().unwrap_or_default()),
            },
        };
        if let Err(e) = self.enforcement.append(&entry).await {
            tracing::warn!(error = %e, "could not write enforcement log");
        }
    }
}

async fn ensure_state_dir(dir: &Path) -> Result<(), WardenError> {
    tokio::fs::create_dir_all(dir).await?;
    let gitignore = dir.join(".gitignore");
    if !tokio::fs::try_exists(&gitignore).await? {
        tokio::fs::write(&gitignore, STATE_GITIGNORE).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::TRIP_THRESHOLD;
    use crate::context::FixedClock;
    use crate::revision::StaticRevisionProbe;
    use crate::signer::{SecretKey, Signer};
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use tempfile::TempDir;

    fn ctx(dir: &TempDir) -> Context {
        let signer = Signer::new(Some(SecretKey::from_hex(&"7e".repeat(32)).unwrap()));
        let now = Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap();
        Context::new(dir.path().join("app"), dir.path().join("home/.warden"), signer)
            .with_session("session-1")
            .with_clock(Arc::new(FixedClock::new(now)))
    }

    fn dispatcher(ctx: Context) -> PolicyDispatcher {
        PolicyDispatcher::new(ctx, Config::default(), Arc::new(StaticRevisionProbe::revision("abc123")))
    }

    fn bash(command: &str) -> ToolEvent {
        ToolEvent::new("Bash", json!({ "command": command }))
    }

    #[tokio::test]
    async fn test_missing_fields_block() {
        let dir = TempDir::new().unwrap();
        let decision = dispatcher(ctx(&dir)).pre_tool_use(&ToolEvent::new("Edit", json!({}))).await;
        assert!(!decision.allowed);
        assert!(decision.message.unwrap().contains("file_path"));
    }

    #[tokio::test]
    async fn test_ungoverned_project_allows_ordinary_work() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher(ctx(&dir));
        assert!(dispatcher.pre_tool_use(&bash("cargo test")).await.allowed);
        assert!(dispatcher.pre_tool_use(&ToolEvent::new("Grep", json!({"pattern": "x"}))).await.allowed);
    }

    #[tokio::test]
    async fn test_failures_trip_breaker_and_block_mutations() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher(ctx(&dir));
        let failed = bash("make").with_response(json!({"exit_code": 1, "stderr": "Build timed out"}));

        let mut last = None;
        for _ in 0..TRIP_THRESHOLD {
            last = dispatcher.post_tool_use(&failed).await.unwrap();
        }
        assert!(last.unwrap().contains("TRIPPED"));

        let decision = dispatcher.pre_tool_use(&bash("make")).await;
        assert!(!decision.allowed);
        assert!(decision.message.unwrap().contains("reset breaker"));
        assert!(
            dispatcher
                .pre_tool_use(&ToolEvent::new("Read", json!({"file_path": "Makefile"})))
                .await
                .allowed
        );
    }

    #[tokio::test]
    async fn test_storage_failure_fails_closed() {
        let dir = TempDir::new().unwrap();
        let ctx = ctx(&dir);
        std::fs::create_dir_all(ctx.project_warden_dir()).unwrap();
        std::fs::write(ctx.state_dir(), b"not a directory").unwrap();

        let decision = dispatcher(ctx).pre_tool_use(&bash("make")).await;
        assert!(!decision.allowed);
        assert!(decision.message.unwrap().contains("circuit_breaker"));
    }

    #[tokio::test]
    async fn test_release_requires_clearance() {
        let dir = TempDir::new().unwrap();
        let ctx = ctx(&dir);
        ProjectManifest {
            app: Some("SaneBar".to_string()),
        }
        .save(&ctx.manifest_path())
        .await
        .unwrap();
        let dispatcher = dispatcher(ctx.clone());
        dispatcher.session_start().await.unwrap();
        StartupGate::new(&ctx, &Config::default())
            .unwrap()
            .observe(&ToolAction::Bash {
                command: "pkill -f stale".to_string(),
            })
            .await
            .unwrap();

        let release = bash("./scripts/release.sh --full");
        let decision = dispatcher.pre_tool_use(&release).await;
        assert!(!decision.allowed);
        assert!(decision.message.unwrap().contains("No release clearance"));

        ReleaseClearance::new(&ctx)
            .grant("SaneBar", ctx.project_dir(), "abc123")
            .await
            .unwrap();
        assert!(dispatcher.pre_tool_use(&release).await.allowed);
    }

    #[tokio::test]
    async fn test_bypass_stands_down_but_self_protection_holds() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher(ctx(&dir));
        let failed = bash("make").with_response(json!({"is_error": true, "error": "boom"}));
        for _ in 0..TRIP_THRESHOLD {
            dispatcher.post_tool_use(&failed).await.unwrap();
        }
        assert!(!dispatcher.pre_tool_use(&bash("make")).await.allowed);

        dispatcher.user_prompt(&UserPrompt::new("bypass on")).await.unwrap();
        assert!(dispatcher.pre_tool_use(&bash("make")).await.allowed);
        assert!(
            !dispatcher
                .pre_tool_use(&bash("rm .warden/state/circuit_breaker.json"))
                .await
                .allowed
        );
    }

    #[tokio::test]
    async fn test_session_start_keeps_trip_and_writes_gitignore() {
        let dir = TempDir::new().unwrap();
        let ctx = ctx(&dir);
        let dispatcher = dispatcher(ctx.clone());
        let failed = bash("make").with_response(json!({"exit_code": 2}));
        for _ in 0..TRIP_THRESHOLD {
            dispatcher.post_tool_use(&failed).await.unwrap();
        }

        let report = dispatcher.session_start().await.unwrap();
        assert!(report.breaker.tripped);
        assert!(report.breaker.pending_user_reset);
        assert!(report.message().unwrap().contains("STILL TRIPPED"));
        assert!(report.gate.is_none());
        assert!(ctx.state_dir().join(".gitignore").exists());
    }
}
