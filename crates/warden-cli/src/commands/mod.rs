//! Command implementations.

pub mod clearance;
pub mod config;
pub mod hook;
pub mod key;
pub mod status;

use std::path::{Path, PathBuf};
use std::time::Duration;
use warden_core::context::key_path;
use warden_core::{Config, ConfigStore, Context, GitRevisionProbe, SecretKey, Signer};

/// Typed error used to propagate deterministic process exit codes.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct CommandExit {
    pub code: i32,
    pub message: String,
}

impl CommandExit {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Signer for the key under `warden_home`.
///
/// A missing or unreadable key yields an unkeyed signer: every verification
/// fails and every write is refused.
pub async fn load_signer(warden_home: &Path) -> Signer {
    let path = key_path(warden_home);
    match SecretKey::load(&path).await {
        Ok(Some(key)) => Signer::new(Some(key)),
        Ok(None) => {
            tracing::warn!(path = %path.display(), "no signing key; state cannot be verified");
            Signer::unkeyed()
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "unusable signing key");
            Signer::unkeyed()
        }
    }
}

pub async fn load_context(
    project_dir: PathBuf,
    warden_home: &Path,
    session_id: Option<String>,
) -> (Context, Config) {
    let signer = load_signer(warden_home).await;
    let config = ConfigStore::new(warden_home).load();
    let mut ctx = Context::new(project_dir, warden_home, signer);
    if let Some(session) = session_id {
        ctx = ctx.with_session(session);
    }
    (ctx, config)
}

pub fn revision_probe(config: &Config) -> GitRevisionProbe {
    GitRevisionProbe::new(Duration::from_secs(config.git_timeout_secs))
}

/// Explicit directory, else `WARDEN_PROJECT_DIR` / `CLAUDE_PROJECT_DIR`,
/// else the working directory. Relative paths are made absolute.
pub fn resolve_project_dir(explicit: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    let cwd = std::env::current_dir()?;
    let chosen = explicit.filter(|d| !d.as_os_str().is_empty()).or_else(|| {
        ["WARDEN_PROJECT_DIR", "CLAUDE_PROJECT_DIR"]
            .iter()
            .find_map(|var| std::env::var_os(var).filter(|v| !v.is_empty()))
            .map(PathBuf::from)
    });
    Ok(match chosen {
        Some(dir) if dir.is_absolute() => dir,
        Some(dir) => cwd.join(dir),
        None => cwd,
    })
}
