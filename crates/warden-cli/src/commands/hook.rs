//! `warden hook <event>`: one hook invocation, event JSON on stdin.
//!
//! Exit codes follow the hook protocol: 0 lets the tool call proceed, 2
//! blocks it and hands stderr back to the agent.

use super::{load_context, resolve_project_dir, revision_probe, CommandExit};
use crate::cli::HookKind;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use warden_core::{PolicyDispatcher, ToolEvent, UserPrompt};

/// Exit code that blocks a pending tool call.
pub const BLOCK_EXIT_CODE: i32 = 2;

/// Raw hook payload. Every field is optional; which ones matter depends on
/// the event.
#[derive(Debug, Default, Deserialize)]
pub struct HookEvent {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub hook_event_name: Option<String>,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub tool_input: serde_json::Value,
    #[serde(default)]
    pub tool_response: Option<serde_json::Value>,
    #[serde(default, alias = "user_prompt")]
    pub prompt: Option<String>,
}

impl HookEvent {
    /// `None` for input that is not a JSON object.
    pub fn parse(input: &str) -> Option<Self> {
        match serde_json::from_str::<Self>(input) {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::debug!(error = %e, "hook input is not an event");
                None
            }
        }
    }

    /// The tool call, when the payload names a tool.
    pub fn tool_event(&self) -> Option<ToolEvent> {
        let name = self.tool_name.as_deref().filter(|n| !n.is_empty())?;
        let mut event = ToolEvent::new(name, self.tool_input.clone());
        event.tool_response = self.tool_response.clone();
        Some(event)
    }
}

pub async fn run(kind: HookKind, warden_home: &Path) -> anyhow::Result<()> {
    let mut input = String::new();
    tokio::io::stdin().read_to_string(&mut input).await?;

    let Some(event) = HookEvent::parse(&input) else {
        return Ok(());
    };
    tracing::debug!(?kind, name = ?event.hook_event_name, tool = ?event.tool_name, "hook event");

    let project_dir = resolve_project_dir(event.cwd.clone())?;
    let (ctx, config) = load_context(project_dir, warden_home, event.session_id.clone()).await;
    let probe = revision_probe(&config);
    let dispatcher = PolicyDispatcher::new(ctx, config, Arc::new(probe));

    match kind {
        HookKind::PreToolUse => pre_tool_use(&dispatcher, &event).await,
        HookKind::PostToolUse => post_tool_use(&dispatcher, &event).await,
        HookKind::UserPrompt => user_prompt(&dispatcher, &event).await,
        HookKind::SessionStart => session_start(&dispatcher).await,
    }
}

async fn pre_tool_use(dispatcher: &PolicyDispatcher, event: &HookEvent) -> anyhow::Result<()> {
    let Some(tool_event) = event.tool_event() else {
        return Ok(());
    };
    let decision = dispatcher.pre_tool_use(&tool_event).await;
    if decision.allowed {
        if let Some(message) = decision.message {
            println!("{message}");
        }
        return Ok(());
    }
    Err(CommandExit::new(
        BLOCK_EXIT_CODE,
        decision.message.unwrap_or_else(|| "BLOCKED".to_string()),
    )
    .into())
}

async fn post_tool_use(dispatcher: &PolicyDispatcher, event: &HookEvent) -> anyhow::Result<()> {
    let Some(tool_event) = event.tool_event() else {
        return Ok(());
    };
    match dispatcher.post_tool_use(&tool_event).await {
        Ok(Some(message)) => eprintln!("{message}"),
        Ok(None) => {}
        Err(e) => eprintln!("warden: could not record tool outcome: {e}"),
    }
    Ok(())
}

async fn user_prompt(dispatcher: &PolicyDispatcher, event: &HookEvent) -> anyhow::Result<()> {
    let prompt = UserPrompt::new(event.prompt.clone().unwrap_or_default());
    match dispatcher.user_prompt(&prompt).await {
        Ok(report) => {
            if let Some(message) = report.message() {
                println!("{message}");
            }
        }
        Err(e) => eprintln!("warden: could not process prompt: {e}"),
    }
    Ok(())
}

async fn session_start(dispatcher: &PolicyDispatcher) -> anyhow::Result<()> {
    if !dispatcher.context().signer().has_key() {
        println!("WARDEN: no signing key found. Run `warden key init` so policy state can be trusted.");
    }
    match dispatcher.session_start().await {
        Ok(report) => {
            if let Some(message) = report.message() {
                println!("{message}");
            }
        }
        Err(e) => eprintln!("warden: session start failed: {e}"),
    }
    Ok(())
}
