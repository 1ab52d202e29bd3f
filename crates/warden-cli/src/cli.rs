//! CLI argument and command definitions.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "warden", version, about = "Policy enforcement for coding-agent tool use")]
pub struct Cli {
    /// Directory holding the signing key, clearances and config.
    #[arg(long, env = "WARDEN_HOME", global = true)]
    pub home: Option<PathBuf>,

    /// Enable verbose logging (stderr).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// `--home`, else `~/.warden`.
    pub fn warden_home(&self) -> anyhow::Result<PathBuf> {
        if let Some(home) = &self.home {
            return Ok(home.clone());
        }
        let home = dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Cannot determine home directory"))?;
        Ok(home.join(".warden"))
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Handle one hook event read from stdin.
    Hook {
        #[arg(value_enum)]
        event: HookKind,
    },

    /// Show breaker, gate, bypass and requirement state for a project.
    Status {
        /// Project directory (defaults to the working directory).
        #[arg(long)]
        project: Option<PathBuf>,
    },

    /// Manage the state signing key.
    Key {
        #[command(subcommand)]
        action: KeyAction,
    },

    /// Grant or inspect release clearance.
    Clearance {
        #[command(subcommand)]
        action: ClearanceAction,
    },

    /// Write or show the global config.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum HookKind {
    PreToolUse,
    PostToolUse,
    UserPrompt,
    SessionStart,
}

#[derive(Subcommand)]
pub enum KeyAction {
    /// Generate a new signing key.
    Init {
        /// Replace an existing key. Every signed document becomes untrusted.
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Write the default config so it can be edited.
    Init {
        /// Replace an existing config file.
        #[arg(long)]
        force: bool,
    },
    /// Print the config in effect.
    Show,
}

#[derive(Subcommand)]
pub enum ClearanceAction {
    /// Issue clearance for the project's current commit.
    Grant {
        #[arg(long)]
        app: String,
        #[arg(long)]
        project: Option<PathBuf>,
    },
    /// Check whether a release would currently be allowed.
    Check {
        #[arg(long)]
        app: String,
        #[arg(long)]
        project: Option<PathBuf>,
    },
}
