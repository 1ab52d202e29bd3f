//! Startup gate: a per-session checklist that must be completed before
//! mutating tools are allowed.
//!
//! Steps whose prerequisite artifact does not exist in the project are
//! satisfied at initialisation, so projects without a given feature are
//! never blocked on it. Once every step is done the gate writes an open
//! marker bound to the session; from then on the gate stays open for that
//! session regardless of what the step document says.

use crate::action::{is_mutating_tool, ToolAction};
use crate::config::{Config, StepConfig};
use crate::context::Context;
use crate::decision::Block;
use crate::error::WardenError;
use crate::store::{DocumentState, StateStore};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const GATE_FILE: &str = "startup_gate.json";
pub const GATE_OPEN_MARKER_FILE: &str = "startup_gate_open.json";

/// Shell commands that only inspect state; always fine during startup.
static READ_ONLY_BASH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\A\s*(?:ls|cat|head|tail|wc|file|stat|which|type|echo|printf|git\s+(?:status|log|diff|branch|remote)|pwd|date|whoami|hostname|uname)\b",
    )
    .expect("valid regex")
});

/// Chaining, pipes, redirects, backgrounding and substitutions. A command
/// containing any of these is more than its first word.
static COMPOUND_BASH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[;&|<>`\n]|\$\(").expect("valid regex"));

/// Whether `command` is a single simple command.
fn is_simple_command(command: &str) -> bool {
    !COMPOUND_BASH.is_match(command)
}

/// Persisted checklist for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateState {
    pub session_id: Option<String>,
    pub open: bool,
    pub steps: BTreeMap<String, bool>,
    pub opened_at: Option<DateTime<Utc>>,
}

impl GateState {
    pub fn initialize(session_id: Option<String>, steps: impl IntoIterator<Item = (String, bool)>, now: DateTime<Utc>) -> Self {
        let mut state = Self {
            session_id,
            open: false,
            steps: steps.into_iter().collect(),
            opened_at: None,
        };
        state.refresh_open(now);
        state
    }

    /// Mark `step` done. Returns whether anything changed.
    pub fn mark_complete(&mut self, step: &str, now: DateTime<Utc>) -> bool {
        match self.steps.get_mut(step) {
            Some(done) if !*done => {
                *done = true;
                self.refresh_open(now);
                true
            }
            _ => false,
        }
    }

    /// Open never reverts within a session.
    fn refresh_open(&mut self, now: DateTime<Utc>) {
        if !self.open && self.steps.values().all(|done| *done) {
            self.open = true;
            self.opened_at = Some(now);
        }
    }

    pub fn is_complete(&self, step: &str) -> bool {
        self.steps.get(step).copied().unwrap_or(false)
    }
}

/// Written once the gate opens; outranks the step document for its session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateOpenMarker {
    pub session_id: Option<String>,
    pub opened_at: DateTime<Utc>,
}

/// A step as shown to the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepSummary {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateVerdict {
    Allowed,
    Blocked {
        pending: Vec<StepSummary>,
        completed: Vec<StepSummary>,
    },
}

impl GateVerdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    pub fn to_block(&self, action: &ToolAction) -> Option<Block> {
        let Self::Blocked { pending, completed } = self else {
            return None;
        };
        let mut why = String::from("Startup steps are not complete.\nPending:");
        for step in pending {
            why.push_str(&format!("\n  [ ] {}", step.description));
        }
        if !completed.is_empty() {
            why.push_str("\nCompleted:");
            for step in completed {
                why.push_str(&format!("\n  [x] {}", step.description));
            }
        }
        why.push_str("\nAllowed now: Read, Grep, Glob, WebSearch, MCP tools, startup Bash");
        Some(Block::new(
            action.describe(),
            why,
            "Complete the pending steps above; the gate opens by itself once they are done.",
        ))
    }
}

#[derive(Debug, Clone)]
struct CompiledStep {
    config: StepConfig,
    triggers: Vec<(String, Regex)>,
}

impl CompiledStep {
    fn matches(&self, action: &ToolAction) -> bool {
        let Some(subject) = action.subject() else {
            return false;
        };
        if matches!(action, ToolAction::Bash { .. }) && !is_simple_command(subject) {
            return false;
        }
        self.triggers
            .iter()
            .any(|(tool, re)| tool == action.tool_name() && re.is_match(subject))
    }

    fn summary(&self) -> StepSummary {
        StepSummary {
            name: self.config.name.clone(),
            description: self.config.description.clone(),
        }
    }
}

/// The gate for one project and session.
#[derive(Debug, Clone)]
pub struct StartupGate {
    ctx: Context,
    store: StateStore,
    steps: Vec<CompiledStep>,
}

impl StartupGate {
    pub fn new(ctx: &Context, config: &Config) -> Result<Self, WardenError> {
        let steps = config
            .startup_steps
            .iter()
            .map(|step| {
                let triggers = step
                    .completed_by
                    .iter()
                    .map(|t| {
                        Regex::new(&t.pattern)
                            .map(|re| (t.tool.clone(), re))
                            .map_err(|e| WardenError::Config(format!("step {}: {e}", step.name)))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(CompiledStep {
                    config: step.clone(),
                    triggers,
                })
            })
            .collect::<Result<Vec<_>, WardenError>>()?;

        Ok(Self {
            ctx: ctx.clone(),
            store: StateStore::new(ctx.signer().clone()),
            steps,
        })
    }

    /// Build a fresh checklist for the current session and persist it.
    pub async fn initialize(&self) -> Result<GateState, WardenError> {
        let mut steps = Vec::with_capacity(self.steps.len());
        for step in &self.steps {
            let applies = self.prerequisite_present(&step.config).await;
            if !applies {
                tracing::debug!(step = %step.config.name, "startup step auto-satisfied");
            }
            steps.push((step.config.name.clone(), !applies));
        }

        let state = GateState::initialize(self.ctx.session_id().map(str::to_string), steps, self.ctx.now());
        self.store.remove(&self.ctx.state_file(GATE_OPEN_MARKER_FILE)).await?;
        self.persist(&state).await?;
        Ok(state)
    }

    async fn prerequisite_present(&self, step: &StepConfig) -> bool {
        if step.requires_any.is_empty() {
            return true;
        }
        for path in &step.requires_any {
            if tokio::fs::try_exists(self.ctx.resolve(path)).await.unwrap_or(false) {
                return true;
            }
        }
        false
    }

    /// The checklist in effect for this session, initialising one if the
    /// stored document is missing, untrusted, or from another session.
    pub async fn state(&self) -> Result<GateState, WardenError> {
        if let Some(marker) = self.open_marker().await? {
            return Ok(GateState {
                session_id: marker.session_id,
                open: true,
                steps: self.steps.iter().map(|s| (s.config.name.clone(), true)).collect(),
                opened_at: Some(marker.opened_at),
            });
        }

        match self.store.load::<GateState>(&self.ctx.state_file(GATE_FILE)).await? {
            DocumentState::Trusted(state) if self.same_session(state.session_id.as_deref()) => Ok(state),
            _ => self.initialize().await,
        }
    }

    async fn open_marker(&self) -> Result<Option<GateOpenMarker>, WardenError> {
        let marker = self
            .store
            .load::<GateOpenMarker>(&self.ctx.state_file(GATE_OPEN_MARKER_FILE))
            .await?
            .into_trusted();
        Ok(marker.filter(|m| self.same_session(m.session_id.as_deref())))
    }

    fn same_session(&self, session_id: Option<&str>) -> bool {
        session_id == self.ctx.session_id()
    }

    async fn persist(&self, state: &GateState) -> Result<(), WardenError> {
        self.store.write_signed(&self.ctx.state_file(GATE_FILE), state).await?;
        if state.open {
            let marker = GateOpenMarker {
                session_id: state.session_id.clone(),
                opened_at: state.opened_at.unwrap_or_else(|| self.ctx.now()),
            };
            self.store
                .write_signed(&self.ctx.state_file(GATE_OPEN_MARKER_FILE), &marker)
                .await?;
        }
        Ok(())
    }

    /// Whether `command` is part of startup itself or only reads state.
    pub fn is_startup_command(&self, command: &str) -> bool {
        if !is_simple_command(command) {
            return false;
        }
        if READ_ONLY_BASH.is_match(command) {
            return true;
        }
        self.steps.iter().any(|step| {
            step.triggers
                .iter()
                .any(|(tool, re)| tool == "Bash" && re.is_match(command))
        })
    }

    pub async fn check_gate(&self, action: &ToolAction) -> Result<GateVerdict, WardenError> {
        if !is_mutating_tool(action.tool_name()) {
            return Ok(GateVerdict::Allowed);
        }
        if let ToolAction::Bash { command } = action {
            if self.is_startup_command(command) {
                return Ok(GateVerdict::Allowed);
            }
        }

        let state = self.state().await?;
        if state.open {
            return Ok(GateVerdict::Allowed);
        }

        let (completed, pending): (Vec<_>, Vec<_>) = self
            .steps
            .iter()
            .partition(|step| state.is_complete(&step.config.name));
        Ok(GateVerdict::Blocked {
            pending: pending.into_iter().map(CompiledStep::summary).collect(),
            completed: completed.into_iter().map(CompiledStep::summary).collect(),
        })
    }

    /// Record a successful tool call, completing any step it satisfies.
    pub async fn observe(&self, action: &ToolAction) -> Result<Option<GateState>, WardenError> {
        let matching: Vec<&str> = self
            .steps
            .iter()
            .filter(|step| step.matches(action))
            .map(|step| step.config.name.as_str())
            .collect();
        if matching.is_empty() {
            return Ok(None);
        }

        let mut state = self.state().await?;
        if state.open {
            return Ok(None);
        }
        let now = self.ctx.now();
        let mut changed = false;
        for name in matching {
            changed |= state.mark_complete(name, now);
        }
        if !changed {
            return Ok(None);
        }

        self.persist(&state).await?;
        if state.open {
            tracing::info!(session = ?state.session_id, "startup gate opened");
        }
        Ok(Some(state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::FixedClock;
    use crate::signer::{SecretKey, Signer};
    use chrono::TimeZone;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn setup(dir: &TempDir, session: &str) -> Context {
        let signer = Signer::new(Some(SecretKey::from_hex(&"5a".repeat(32)).unwrap()));
        let now = Utc.with_ymd_and_hms(2026, 2, 2, 8, 0, 0).unwrap();
        Context::new(dir.path().join("project"), dir.path().join("home/.warden"), signer)
            .with_session(session)
            .with_clock(Arc::new(FixedClock::new(now)))
    }

    fn bash(command: &str) -> ToolAction {
        ToolAction::Bash {
            command: command.to_string(),
        }
    }

    fn edit() -> ToolAction {
        ToolAction::FileWrite {
            tool: "Edit".to_string(),
            file_path: "src/main.rs".to_string(),
        }
    }

    #[tokio::test]
    async fn test_missing_prerequisites_auto_complete() {
        let dir = TempDir::new().unwrap();
        let ctx = setup(&dir, "s1");
        let gate = StartupGate::new(&ctx, &Config::default()).unwrap();

        let state = gate.initialize().await.unwrap();
        assert!(!state.open);
        assert!(state.is_complete("session_docs"));
        assert!(state.is_complete("system_clean"));
        assert!(!state.is_complete("orphan_cleanup"));
    }

    #[tokio::test]
    async fn test_blocks_mutations_but_not_reads_or_startup_bash() {
        let dir = TempDir::new().unwrap();
        let ctx = setup(&dir, "s1");
        std::fs::create_dir_all(ctx.project_dir()).unwrap();
        std::fs::write(ctx.project_dir().join("DEVELOPMENT.md"), "# dev").unwrap();
        let gate = StartupGate::new(&ctx, &Config::default()).unwrap();
        gate.initialize().await.unwrap();

        let verdict = gate.check_gate(&edit()).await.unwrap();
        let GateVerdict::Blocked { pending, .. } = &verdict else {
            panic!("expected block");
        };
        let names: Vec<&str> = pending.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["session_docs", "orphan_cleanup"]);
        assert!(verdict.to_block(&edit()).unwrap().to_string().contains("[ ] Kill orphaned"));

        let read = ToolAction::Read {
            file_path: "README.md".to_string(),
        };
        assert!(gate.check_gate(&read).await.unwrap().is_allowed());
        assert!(gate.check_gate(&bash("git status")).await.unwrap().is_allowed());
        assert!(gate.check_gate(&bash("pgrep -fl claude")).await.unwrap().is_allowed());
        assert!(!gate.check_gate(&bash("cargo build")).await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn test_compound_commands_are_not_exempt() {
        let dir = TempDir::new().unwrap();
        let ctx = setup(&dir, "s1");
        let gate = StartupGate::new(&ctx, &Config::default()).unwrap();
        gate.initialize().await.unwrap();

        for command in [
            "echo hi > src/main.rs",
            "ls && cargo publish",
            "cargo publish; ps aux",
            "git status || rm -rf src",
            "cat Cargo.toml | tee Cargo.lock",
            "echo $(cargo publish)",
            "echo `cargo publish`",
            "pgrep -f x & cargo publish",
            "ps aux\ncargo publish",
        ] {
            assert!(!gate.is_startup_command(command), "{command}");
            assert!(!gate.check_gate(&bash(command)).await.unwrap().is_allowed(), "{command}");
        }
        assert!(gate.check_gate(&bash("ls -la src")).await.unwrap().is_allowed());
        assert!(gate.check_gate(&bash("ps aux")).await.unwrap().is_allowed());

        // A compound command does not complete a step either.
        assert_eq!(gate.observe(&bash("ps aux; cargo publish")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_observed_steps_open_the_gate() {
        let dir = TempDir::new().unwrap();
        let ctx = setup(&dir, "s1");
        std::fs::create_dir_all(ctx.project_dir()).unwrap();
        std::fs::write(ctx.project_dir().join("SESSION_HANDOFF.md"), "x").unwrap();
        let gate = StartupGate::new(&ctx, &Config::default()).unwrap();
        gate.initialize().await.unwrap();

        let read = ToolAction::Read {
            file_path: ctx.project_dir().join("SESSION_HANDOFF.md").display().to_string(),
        };
        let state = gate.observe(&read).await.unwrap().unwrap();
        assert!(!state.open);

        let state = gate.observe(&bash("pkill -f orphan")).await.unwrap().unwrap();
        assert!(state.open);
        assert!(gate.check_gate(&edit()).await.unwrap().is_allowed());
        assert_eq!(gate.observe(&bash("pkill -f orphan")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_open_is_monotonic_despite_stale_step_document() {
        let dir = TempDir::new().unwrap();
        let ctx = setup(&dir, "s1");
        let gate = StartupGate::new(&ctx, &Config::default()).unwrap();
        gate.initialize().await.unwrap();
        gate.observe(&bash("ps aux")).await.unwrap();
        assert!(gate.check_gate(&edit()).await.unwrap().is_allowed());

        // A stale, validly signed closed checklist for the same session.
        let stale = GateState::initialize(
            Some("s1".to_string()),
            [("orphan_cleanup".to_string(), false)],
            ctx.now(),
        );
        StateStore::new(ctx.signer().clone())
            .write_signed(&ctx.state_file(GATE_FILE), &stale)
            .await
            .unwrap();

        for _ in 0..3 {
            assert!(gate.check_gate(&edit()).await.unwrap().is_allowed());
        }
    }

    #[tokio::test]
    async fn test_new_session_reinitialises() {
        let dir = TempDir::new().unwrap();
        let first = StartupGate::new(&setup(&dir, "s1"), &Config::default()).unwrap();
        first.initialize().await.unwrap();
        first.observe(&bash("ps aux")).await.unwrap();
        assert!(first.check_gate(&edit()).await.unwrap().is_allowed());

        let second = StartupGate::new(&setup(&dir, "s2"), &Config::default()).unwrap();
        assert!(!second.check_gate(&edit()).await.unwrap().is_allowed());
    }

    #[test]
    fn test_bad_step_pattern_is_config_error() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.startup_steps[0].completed_by[0].pattern = "(".to_string();
        assert!(matches!(
            StartupGate::new(&setup(&dir, "s1"), &config),
            Err(WardenError::Config(_))
        ));
    }
}
