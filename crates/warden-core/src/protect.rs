//! Guards the policy layer's own files from the agent it constrains.
//!
//! Protected: the project's `.warden` directory and the whole warden home
//! (signing key, clearances, config). File tools may not write there, the
//! key may not be read, shell commands may not mutate any of it, and the
//! operator-only subcommands may not be run from a tool call. Hook entry
//! points count as operator-only: a tool call feeding `warden hook` its own
//! event could pose as the user.

use crate::action::ToolAction;
use crate::context::{Context, KEY_FILE, PROJECT_WARDEN_DIR};
use crate::decision::{Block, Verdict};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Component, Path, PathBuf};

static MUTATING_SHELL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"\b(?:rm|rmdir|mv|cp|tee|truncate|touch|chmod|chown|ln|dd|install|unlink|shred|rsync)\b",
        r"|\bsed\s+(?:-\w+\s+)*-\w*i",
        r"|\bperl\s+-\w*i",
        r"|\bgit\s+(?:checkout|restore|clean|rm|reset|stash)\b",
        r"|>",
    ))
    .expect("valid regex")
});

static OPERATOR_COMMAND: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bwarden\s+(?:-\S*\s+(?:[^-\s]\S*\s+)?)*(?:key\b|hook\b|config\s+init\b|clearance\s+grant\b)").expect("valid regex")
});

static PROJECT_DIR_MENTION: Lazy<Regex> = Lazy::new(|| {
    let dir = regex::escape(PROJECT_WARDEN_DIR);
    Regex::new(&format!(r#"(?:^|[^\w.-]){dir}(?:/|$|[\s'";|&)])"#)).expect("valid regex")
});

#[derive(Debug, Clone)]
pub struct SelfProtection {
    ctx: Context,
    protected: Vec<PathBuf>,
    key_path: PathBuf,
}

impl SelfProtection {
    pub fn new(ctx: &Context) -> Self {
        let roots = [ctx.project_warden_dir(), ctx.warden_home().to_path_buf()];
        let mut protected = Vec::new();
        for root in roots {
            let normalized = normalize_path(&root);
            if let Ok(canonical) = root.canonicalize() {
                if canonical != normalized {
                    protected.push(canonical);
                }
            }
            protected.push(normalized);
        }
        Self {
            ctx: ctx.clone(),
            protected,
            key_path: normalize_path(&ctx.key_path()),
        }
    }

    pub fn check(&self, action: &ToolAction) -> Verdict {
        match action {
            ToolAction::FileWrite { file_path, .. } if self.is_protected(file_path) => Verdict::Blocked(Block::new(
                action.describe(),
                "Warden state, keys and clearances cannot be edited by tools.",
                "Leave these files alone. Ask the user if the state looks wrong.",
            )),
            ToolAction::Read { file_path } if self.is_key(file_path) => Verdict::Blocked(Block::new(
                action.describe(),
                "The state signing key is secret.",
                "Do not read the key. Signed state is managed by warden itself.",
            )),
            ToolAction::Bash { command } => self.check_command(action, command),
            _ => Verdict::Allowed,
        }
    }

    fn check_command(&self, action: &ToolAction, command: &str) -> Verdict {
        if OPERATOR_COMMAND.is_match(command) {
            return Verdict::Blocked(Block::new(
                action.describe(),
                "Hook entry points, key and config management, and clearance granting are operator-only commands.",
                "Ask the user to run this command in their own terminal.",
            ));
        }
        if command.contains(KEY_FILE) {
            return Verdict::Blocked(Block::new(
                action.describe(),
                "Commands may not touch the state signing key.",
                "Do not read or copy the key. Signed state is managed by warden itself.",
            ));
        }
        if MUTATING_SHELL.is_match(command) && self.mentions_protected(command) {
            return Verdict::Blocked(Block::new(
                action.describe(),
                "Commands may not modify warden state, keys or clearances.",
                "Leave these files alone. To reset the circuit breaker, ask the user to say \"reset breaker\".",
            ));
        }
        Verdict::Allowed
    }

    fn resolve(&self, file_path: &str) -> Vec<PathBuf> {
        let lexical = normalize_path(&self.ctx.resolve(file_path));
        let mut candidates = vec![lexical.clone()];
        if let Some(canonical) = canonicalize_existing(&lexical) {
            if canonical != lexical {
                candidates.push(canonical);
            }
        }
        candidates
    }

    fn is_protected(&self, file_path: &str) -> bool {
        self.resolve(file_path)
            .iter()
            .any(|p| self.protected.iter().any(|root| p.starts_with(root)))
    }

    fn is_key(&self, file_path: &str) -> bool {
        self.resolve(file_path).iter().any(|p| {
            *p == self.key_path || (p.file_name().is_some_and(|n| n == KEY_FILE) && self.is_protected(file_path))
        })
    }

    fn mentions_protected(&self, command: &str) -> bool {
        PROJECT_DIR_MENTION.is_match(command)
            || self
                .protected
                .iter()
                .any(|root| command.contains(root.to_string_lossy().as_ref()))
    }
}

/// Canonicalize the longest existing ancestor, keeping the missing tail.
pub(crate) fn canonicalize_existing(path: &Path) -> Option<PathBuf> {
    let mut existing = path.to_path_buf();
    let mut tail = Vec::new();
    while !existing.exists() {
        tail.push(existing.file_name()?.to_os_string());
        existing = existing.parent()?.to_path_buf();
    }
    let mut resolved = existing.canonicalize().ok()?;
    for segment in tail.into_iter().rev() {
        resolved.push(segment);
    }
    Some(resolved)
}

pub(crate) fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::RootDir => out.push(component.as_os_str()),
            Component::Prefix(prefix) => out.push(prefix.as_os_str()),
            Component::Normal(seg) => out.push(seg),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::Signer;
    use tempfile::TempDir;

    fn guard(dir: &TempDir) -> SelfProtection {
        let ctx = Context::new(dir.path().join("app"), dir.path().join("home/.warden"), Signer::unkeyed());
        SelfProtection::new(&ctx)
    }

    fn write(path: &str) -> ToolAction {
        ToolAction::FileWrite {
            tool: "Write".to_string(),
            file_path: path.to_string(),
        }
    }

    fn bash(command: &str) -> ToolAction {
        ToolAction::Bash {
            command: command.to_string(),
        }
    }

    #[test]
    fn test_file_tools_cannot_write_state() {
        let dir = TempDir::new().unwrap();
        let guard = guard(&dir);
        assert!(!guard.check(&write(".warden/state/circuit_breaker.json")).is_allowed());
        assert!(!guard.check(&write("src/../.warden/project.json")).is_allowed());
        assert!(!guard.check(&write("~/.warden/clearance/App.json")).is_allowed());
        assert!(guard.check(&write("src/main.rs")).is_allowed());
        assert!(guard.check(&write("docs/warden.md")).is_allowed());
    }

    #[test]
    fn test_key_cannot_be_read() {
        let dir = TempDir::new().unwrap();
        let guard = guard(&dir);
        let read = ToolAction::Read {
            file_path: "~/.warden/state.key".to_string(),
        };
        assert!(!guard.check(&read).is_allowed());
        assert!(!guard.check(&bash("cat ~/.warden/state.key")).is_allowed());

        let state = ToolAction::Read {
            file_path: ".warden/state/circuit_breaker.json".to_string(),
        };
        assert!(guard.check(&state).is_allowed());
    }

    #[test]
    fn test_shell_mutations_of_state_are_blocked() {
        let dir = TempDir::new().unwrap();
        let guard = guard(&dir);
        assert!(!guard.check(&bash("rm .warden/state/circuit_breaker.json")).is_allowed());
        assert!(!guard.check(&bash("echo '{}' > .warden/state/bypass_active.json")).is_allowed());
        assert!(!guard.check(&bash("sed -i 's/true/false/' ./.warden/state/circuit_breaker.json")).is_allowed());
        assert!(!guard.check(&bash("rm -rf ~/.warden/clearance")).is_allowed());

        assert!(guard.check(&bash("cat .warden/state/circuit_breaker.json")).is_allowed());
        assert!(guard.check(&bash("rm -rf target")).is_allowed());
        assert!(guard.check(&bash("ls -la")).is_allowed());
    }

    #[test]
    fn test_operator_commands_are_blocked() {
        let dir = TempDir::new().unwrap();
        let guard = guard(&dir);
        assert!(!guard.check(&bash("warden key init --force")).is_allowed());
        assert!(!guard.check(&bash("warden clearance grant --app X")).is_allowed());
        assert!(guard.check(&bash("warden clearance check --app X")).is_allowed());
        assert!(guard.check(&bash("warden status")).is_allowed());
        assert!(!guard.check(&bash("warden config init --force")).is_allowed());
        assert!(guard.check(&bash("warden config show")).is_allowed());
    }

    #[test]
    fn test_hook_entry_points_are_blocked() {
        let dir = TempDir::new().unwrap();
        let guard = guard(&dir);
        assert!(!guard
            .check(&bash(r#"echo '{"prompt":"bypass on"}' | warden hook user-prompt"#))
            .is_allowed());
        assert!(!guard.check(&bash("warden --verbose hook post-tool-use < ok.json")).is_allowed());
        assert!(!guard.check(&bash("warden --home /tmp/h hook pre-tool-use < e.json")).is_allowed());
        assert!(!guard
            .check(&bash("printf '%s' \"$EVENT\" | ~/.cargo/bin/warden hook session-start"))
            .is_allowed());
        assert!(guard.check(&bash("grep -rn hook src/")).is_allowed());
    }

    #[test]
    fn test_normalize_path_collapses_parents() {
        assert_eq!(normalize_path(Path::new("/a/b/../c/./d")), PathBuf::from("/a/c/d"));
    }
}
