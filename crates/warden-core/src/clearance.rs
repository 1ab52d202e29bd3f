//! Release clearance: a short-lived signed credential bound to one app, one
//! project directory and one commit.
//!
//! Clearances are issued by the granting workflow and only read here. They
//! expire after a fixed window and are never renewed in place.

use crate::config::Config;
use crate::context::Context;
use crate::decision::Block;
use crate::error::WardenError;
use crate::protect::{canonicalize_existing, normalize_path};
use crate::revision::RevisionProbe;
use crate::store::{DocumentState, StateStore};
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Lifetime of a clearance from the moment it is issued.
pub const CLEARANCE_TTL_HOURS: i64 = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clearance {
    pub app: String,
    pub project_dir: String,
    pub git_sha: String,
    pub cleared_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Clearance {
    pub fn issue(app: &str, project_dir: &Path, git_sha: &str, now: DateTime<Utc>) -> Self {
        Self {
            app: app.to_string(),
            project_dir: project_identity(project_dir),
            git_sha: git_sha.to_string(),
            cleared_at: now,
            expires_at: now + Duration::hours(CLEARANCE_TTL_HOURS),
        }
    }

    /// Every way this clearance fails to cover the given release, in the
    /// order they are reported: app, revision, expiry, project.
    pub fn violations(
        &self,
        app: &str,
        project_dir: &Path,
        current_sha: &str,
        now: DateTime<Utc>,
    ) -> Vec<ClearanceViolation> {
        let mut found = Vec::new();
        if self.app != app {
            found.push(ClearanceViolation::AppMismatch {
                cleared: self.app.clone(),
                requested: app.to_string(),
            });
        }
        if self.git_sha != current_sha {
            found.push(ClearanceViolation::ShaMismatch {
                cleared: self.git_sha.clone(),
                current: current_sha.to_string(),
            });
        }
        if now >= self.expires_at {
            found.push(ClearanceViolation::Expired {
                cleared_at: self.cleared_at,
                expires_at: self.expires_at,
            });
        }
        let project = project_identity(project_dir);
        if self.project_dir != project {
            found.push(ClearanceViolation::ProjectMismatch {
                cleared: self.project_dir.clone(),
                current: project,
            });
        }
        found
    }
}

/// Stable spelling of a project directory: `.`/`..` and trailing slashes
/// collapsed, symlinks resolved where the path exists.
pub fn project_identity(project_dir: &Path) -> String {
    let lexical = normalize_path(project_dir);
    canonicalize_existing(&lexical)
        .unwrap_or(lexical)
        .display()
        .to_string()
}

/// One failed field check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClearanceViolation {
    AppMismatch { cleared: String, requested: String },
    ShaMismatch { cleared: String, current: String },
    Expired { cleared_at: DateTime<Utc>, expires_at: DateTime<Utc> },
    ProjectMismatch { cleared: String, current: String },
}

impl fmt::Display for ClearanceViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AppMismatch { cleared, requested } => {
                write!(f, "Clearance is for {cleared}, not {requested}")
            }
            Self::ShaMismatch { cleared, current } => {
                write!(f, "Clearance is for sha {cleared}, not {current}")
            }
            Self::Expired { cleared_at, expires_at } => write!(
                f,
                "Clearance expired at {} (cleared at {})",
                expires_at.to_rfc3339(),
                cleared_at.to_rfc3339()
            ),
            Self::ProjectMismatch { cleared, current } => {
                write!(f, "Clearance is for project {cleared}, not {current}")
            }
        }
    }
}

/// Why a release was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClearanceBlock {
    /// No clearance document for the app.
    Missing,
    /// A document exists but failed verification.
    Invalid(String),
    /// Verified, but does not cover this release.
    Violated {
        first: ClearanceViolation,
        rest: Vec<ClearanceViolation>,
    },
    /// The current revision could not be determined.
    RevisionUnavailable(String),
}

impl fmt::Display for ClearanceBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => f.write_str("No release clearance"),
            Self::Invalid(reason) => write!(f, "Release clearance is invalid: {reason}"),
            Self::Violated { first, .. } => write!(f, "{first}"),
            Self::RevisionUnavailable(reason) => {
                write!(f, "Cannot determine the current revision: {reason}")
            }
        }
    }
}

impl ClearanceBlock {
    /// Render as a block message for the release command `what`.
    pub fn to_block(&self, app: &str, what: impl Into<String>) -> Block {
        let mut why = self.to_string();
        if let Self::Violated { rest, .. } = self {
            for other in rest {
                why.push_str(&format!("\nAlso: {other}"));
            }
        }
        let remedy = match self {
            Self::RevisionUnavailable(_) => {
                "Make sure the project is a git repository with a commit checked out, then retry.".to_string()
            }
            _ => format!(
                "Run the release pipeline for {app} to obtain fresh clearance \
                 (the user runs `warden clearance grant --app {app}`), then retry."
            ),
        };
        Block::new(what, why, remedy)
    }
}

/// Result of a clearance check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClearanceVerdict {
    Allowed(Clearance),
    Blocked(ClearanceBlock),
}

impl ClearanceVerdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed(_))
    }
}

/// Reads and issues clearances under `<warden_home>/clearance/<app>.json`.
#[derive(Debug, Clone)]
pub struct ReleaseClearance {
    ctx: Context,
    store: StateStore,
}

impl ReleaseClearance {
    pub fn new(ctx: &Context) -> Self {
        Self {
            ctx: ctx.clone(),
            store: StateStore::new(ctx.signer().clone()),
        }
    }

    /// Document path for `app`. App names are restricted to a safe file name
    /// alphabet so they can never address a path outside the clearance dir.
    pub fn clearance_path(&self, app: &str) -> Result<PathBuf, WardenError> {
        let valid = !app.is_empty()
            && !app.starts_with('.')
            && app
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(WardenError::Config(format!("invalid app name: {app:?}")));
        }
        Ok(self.ctx.clearance_dir().join(format!("{app}.json")))
    }

    /// Check the stored clearance for `app` against a known revision.
    pub async fn check_clearance(
        &self,
        app: &str,
        project_dir: &Path,
        current_sha: &str,
    ) -> Result<ClearanceVerdict, WardenError> {
        let path = self.clearance_path(app)?;
        let clearance = match self.store.load::<Clearance>(&path).await? {
            DocumentState::Absent => return Ok(ClearanceVerdict::Blocked(ClearanceBlock::Missing)),
            DocumentState::Untrusted(failure) => {
                return Ok(ClearanceVerdict::Blocked(ClearanceBlock::Invalid(failure.to_string())))
            }
            DocumentState::Trusted(clearance) => clearance,
        };

        let mut violations = clearance
            .violations(app, project_dir, current_sha, self.ctx.now())
            .into_iter();
        match violations.next() {
            None => Ok(ClearanceVerdict::Allowed(clearance)),
            Some(first) => {
                tracing::warn!(app, %first, "release clearance rejected");
                Ok(ClearanceVerdict::Blocked(ClearanceBlock::Violated {
                    first,
                    rest: violations.collect(),
                }))
            }
        }
    }

    /// Check against the revision reported by `probe`. A probe failure or
    /// timeout is a block.
    pub async fn check_current(
        &self,
        app: &str,
        project_dir: &Path,
        probe: &dyn RevisionProbe,
    ) -> Result<ClearanceVerdict, WardenError> {
        match probe.current_revision(project_dir).await {
            Ok(sha) => self.check_clearance(app, project_dir, &sha).await,
            Err(e) => Ok(ClearanceVerdict::Blocked(ClearanceBlock::RevisionUnavailable(e.to_string()))),
        }
    }

    /// Issue and store a clearance for an explicit revision.
    pub async fn grant(&self, app: &str, project_dir: &Path, git_sha: &str) -> Result<Clearance, WardenError> {
        let path = self.clearance_path(app)?;
        let clearance = Clearance::issue(app, project_dir, git_sha, self.ctx.now());
        self.store.write_signed(&path, &clearance).await?;
        tracing::info!(app, git_sha, expires_at = %clearance.expires_at, "release clearance granted");
        Ok(clearance)
    }

    /// Issue a clearance for whatever `probe` reports as current.
    pub async fn grant_current(
        &self,
        app: &str,
        project_dir: &Path,
        probe: &dyn RevisionProbe,
    ) -> Result<Clearance, WardenError> {
        let sha = probe.current_revision(project_dir).await?;
        self.grant(app, project_dir, &sha).await
    }
}

/// A release command that needs clearance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseInvocation {
    /// Value of `--project`, quotes stripped.
    pub project: Option<String>,
}

/// Recognises gated release commands.
#[derive(Debug, Clone)]
pub struct ReleaseMatcher {
    command: Regex,
    flags: Regex,
    bypass: Regex,
}

impl ReleaseMatcher {
    pub fn new(config: &Config) -> Result<Self, WardenError> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| WardenError::Config(format!("invalid pattern {pattern:?}: {e}")))
        };
        let flags = config
            .release_flags
            .iter()
            .map(|f| regex::escape(f))
            .collect::<Vec<_>>()
            .join("|");
        let flags = if flags.is_empty() {
            // No flags configured: every release command is gated.
            String::new()
        } else {
            format!(r"(?:{flags})\b")
        };
        Ok(Self {
            command: compile(&config.release_command_pattern)?,
            flags: compile(&flags)?,
            bypass: compile(&config.release_bypass_pattern)?,
        })
    }

    pub fn detect(&self, command: &str) -> Option<ReleaseInvocation> {
        if !self.command.is_match(command) || !self.flags.is_match(command) {
            return None;
        }
        if self.bypass.is_match(command) {
            return None;
        }
        Some(ReleaseInvocation {
            project: project_flag(command),
        })
    }
}

fn project_flag(command: &str) -> Option<String> {
    let mut words = command.split_whitespace();
    while let Some(word) = words.next() {
        if word == "--project" {
            return words.next().map(|v| v.replace(['"', '\''], ""));
        }
        if let Some(value) = word.strip_prefix("--project=") {
            return Some(value.replace(['"', '\''], ""));
        }
    }
    None
}
