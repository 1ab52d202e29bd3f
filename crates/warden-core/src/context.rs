//! Explicit invocation context.
//!
//! Every component receives a [`Context`] instead of consulting the process
//! environment. Directory resolution happens once, at the process entry point.

use crate::signer::Signer;
use chrono::{DateTime, Duration, Utc};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Directory inside a project that holds the manifest and all state.
pub const PROJECT_WARDEN_DIR: &str = ".warden";
/// Project manifest file name, inside [`PROJECT_WARDEN_DIR`].
pub const MANIFEST_FILE: &str = "project.json";
/// Signing key file name, inside the warden home directory.
pub const KEY_FILE: &str = "state.key";

/// Source of the current time.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A settable clock for tests and replays.
#[derive(Debug, Clone)]
pub struct FixedClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *guard += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Everything a policy decision needs to know about where it runs.
#[derive(Debug, Clone)]
pub struct Context {
    project_dir: PathBuf,
    warden_home: PathBuf,
    user_home: PathBuf,
    session_id: Option<String>,
    signer: Signer,
    clock: Arc<dyn Clock>,
}

impl Context {
    /// Create a context for `project_dir`.
    ///
    /// `warden_home` holds the signing key and clearances (normally
    /// `~/.warden`); its parent is taken as the user's home directory.
    pub fn new(project_dir: impl Into<PathBuf>, warden_home: impl Into<PathBuf>, signer: Signer) -> Self {
        let warden_home = warden_home.into();
        let user_home = warden_home
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| warden_home.clone());
        Self {
            project_dir: project_dir.into(),
            warden_home,
            user_home,
            session_id: None,
            signer,
            clock: Arc::new(SystemClock),
        }
    }

    /// Bind the context to a hook session.
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Override the user home used to expand `~/` in step prerequisites.
    pub fn with_user_home(mut self, user_home: impl Into<PathBuf>) -> Self {
        self.user_home = user_home.into();
        self
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    pub fn warden_home(&self) -> &Path {
        &self.warden_home
    }

    pub fn user_home(&self) -> &Path {
        &self.user_home
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn signer(&self) -> &Signer {
        &self.signer
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// `<project>/.warden`
    pub fn project_warden_dir(&self) -> PathBuf {
        self.project_dir.join(PROJECT_WARDEN_DIR)
    }

    /// `<project>/.warden/project.json`
    pub fn manifest_path(&self) -> PathBuf {
        self.project_warden_dir().join(MANIFEST_FILE)
    }

    /// `<project>/.warden/state`
    pub fn state_dir(&self) -> PathBuf {
        self.project_warden_dir().join("state")
    }

    /// Path of a named state document.
    pub fn state_file(&self, name: &str) -> PathBuf {
        self.state_dir().join(name)
    }

    /// `<warden_home>/state.key`
    pub fn key_path(&self) -> PathBuf {
        key_path(&self.warden_home)
    }

    /// `<warden_home>/clearance`
    pub fn clearance_dir(&self) -> PathBuf {
        self.warden_home.join("clearance")
    }

    /// Reset/override audit log.
    pub fn audit_log_path(&self) -> PathBuf {
        self.state_file("reset_audit.jsonl")
    }

    /// Research findings log, written by the research tooling.
    pub fn findings_log_path(&self) -> PathBuf {
        self.state_file("research_findings.jsonl")
    }

    pub fn prompt_log_path(&self) -> PathBuf {
        self.state_file("prompt_log.jsonl")
    }

    pub fn enforcement_log_path(&self) -> PathBuf {
        self.state_file("enforcement.jsonl")
    }

    /// Resolve `path` against the project directory and the user home.
    ///
    /// `~/x` expands to the user home; relative paths are project-relative.
    pub fn resolve(&self, path: &str) -> PathBuf {
        if let Some(rest) = path.strip_prefix("~/") {
            self.user_home.join(rest)
        } else {
            let p = Path::new(path);
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                self.project_dir.join(p)
            }
        }
    }
}

/// Location of the signing key under a warden home directory.
pub fn key_path(warden_home: &Path) -> PathBuf {
    warden_home.join(KEY_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_paths_are_derived_from_roots() {
        let ctx = Context::new("/work/app", "/home/dev/.warden", Signer::unkeyed());
        assert_eq!(ctx.state_dir(), PathBuf::from("/work/app/.warden/state"));
        assert_eq!(ctx.manifest_path(), PathBuf::from("/work/app/.warden/project.json"));
        assert_eq!(ctx.key_path(), PathBuf::from("/home/dev/.warden/state.key"));
        assert_eq!(ctx.clearance_dir(), PathBuf::from("/home/dev/.warden/clearance"));
        assert_eq!(ctx.user_home(), Path::new("/home/dev"));
    }

    #[test]
    fn test_resolve_expands_home_and_project() {
        let ctx = Context::new("/work/app", "/home/dev/.warden", Signer::unkeyed());
        assert_eq!(ctx.resolve("~/notes.md"), PathBuf::from("/home/dev/notes.md"));
        assert_eq!(ctx.resolve("docs/a.md"), PathBuf::from("/work/app/docs/a.md"));
        assert_eq!(ctx.resolve("/etc/hosts"), PathBuf::from("/etc/hosts"));
    }

    #[test]
    fn test_fixed_clock_advances() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let clock = FixedClock::new(start);
        clock.advance(Duration::hours(2));
        assert_eq!(clock.now(), start + Duration::hours(2));
    }
}
