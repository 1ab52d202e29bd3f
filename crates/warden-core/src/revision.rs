//! Repository revision probing.
//!
//! Clearance granting and clearance checking must compute the revision the
//! same way, so both go through a [`RevisionProbe`].

use crate::error::WardenError;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

/// Default time allowed for a revision probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Answers "what revision is checked out in this project?".
#[async_trait]
pub trait RevisionProbe: Send + Sync {
    /// Full revision id of the project's current HEAD.
    async fn current_revision(&self, project_dir: &Path) -> Result<String, WardenError>;
}

/// Probe backed by `git rev-parse HEAD`.
#[derive(Debug, Clone)]
pub struct GitRevisionProbe {
    timeout: Duration,
}

impl Default for GitRevisionProbe {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_TIMEOUT)
    }
}

impl GitRevisionProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl RevisionProbe for GitRevisionProbe {
    async fn current_revision(&self, project_dir: &Path) -> Result<String, WardenError> {
        let dir = project_dir.to_string_lossy();
        let result = warden_exec::run_command(
            "git",
            &["-C", dir.as_ref(), "rev-parse", "HEAD"],
            project_dir,
            self.timeout,
        )
        .await
        .map_err(|e| WardenError::Revision(e.to_string()))?;

        if !result.success {
            return Err(WardenError::Revision(format!(
                "git rev-parse exited with {}: {}",
                result.exit_code,
                result.stderr_trimmed()
            )));
        }

        let sha = result.stdout_trimmed();
        if !is_revision_id(&sha) {
            return Err(WardenError::Revision(format!("unexpected git output: {sha:?}")));
        }
        Ok(sha)
    }
}

/// Full-length lowercase hex object id (SHA-1 or SHA-256).
fn is_revision_id(text: &str) -> bool {
    matches!(text.len(), 40 | 64) && text.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// A probe that always answers the same thing, for tests and dry runs.
#[derive(Debug, Clone)]
pub struct StaticRevisionProbe {
    answer: Result<String, String>,
}

impl StaticRevisionProbe {
    pub fn revision(sha: impl Into<String>) -> Self {
        Self {
            answer: Ok(sha.into()),
        }
    }

    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            answer: Err(reason.into()),
        }
    }
}

#[async_trait]
impl RevisionProbe for StaticRevisionProbe {
    async fn current_revision(&self, _project_dir: &Path) -> Result<String, WardenError> {
        self.answer.clone().map_err(WardenError::Revision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_revision_id_shape() {
        assert!(is_revision_id(&"a".repeat(40)));
        assert!(is_revision_id(&"0".repeat(64)));
        assert!(!is_revision_id(&"A".repeat(40)));
        assert!(!is_revision_id("abc123"));
        assert!(!is_revision_id(""));
    }

    #[tokio::test]
    async fn test_non_repository_is_an_error() {
        let dir = TempDir::new().unwrap();
        let probe = GitRevisionProbe::default();
        // Either git is missing or the directory is not a repository.
        assert!(probe.current_revision(dir.path()).await.is_err());
    }

    #[tokio::test]
    async fn test_static_probe() {
        let dir = TempDir::new().unwrap();
        let ok = StaticRevisionProbe::revision("abc123");
        assert_eq!(ok.current_revision(dir.path()).await.unwrap(), "abc123");

        let failing = StaticRevisionProbe::failing("timed out");
        assert!(matches!(
            failing.current_revision(dir.path()).await,
            Err(WardenError::Revision(_))
        ));
    }
}
