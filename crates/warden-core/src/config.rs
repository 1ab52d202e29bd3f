use crate::error::WardenError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Serialized settings from ~/.warden/config.json
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Time allowed for `git rev-parse HEAD` before the probe counts as failed.
    pub git_timeout_secs: u64,
    /// Matches commands that perform a release.
    pub release_command_pattern: String,
    /// A release command is gated only when it carries one of these flags.
    pub release_flags: Vec<String>,
    /// Commands matching this are preflight tooling and never gated.
    pub release_bypass_pattern: String,
    /// Startup checklist, in display order.
    pub startup_steps: Vec<StepConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            git_timeout_secs: 5,
            release_command_pattern: r"(?:bash\s+|sh\s+)?(?:\S+/)?(?:full_)?release\.sh\b".to_string(),
            release_flags: vec!["--full".to_string(), "--deploy".to_string()],
            release_bypass_pattern: r"\bSaneMaster\.rb\b".to_string(),
            startup_steps: default_steps(),
        }
    }
}

/// One startup step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepConfig {
    pub name: String,
    pub description: String,
    /// The step only applies when one of these paths exists. `~/` expands to
    /// the user home, relative paths are project-relative. Empty means the
    /// step always applies.
    #[serde(default)]
    pub requires_any: Vec<String>,
    /// Tool calls that complete the step.
    #[serde(default)]
    pub completed_by: Vec<StepTrigger>,
}

/// A tool call pattern: `tool` must match exactly and `pattern` must match
/// the command (Bash) or file path (file tools).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepTrigger {
    pub tool: String,
    pub pattern: String,
}

impl StepTrigger {
    fn new(tool: &str, pattern: &str) -> Self {
        Self {
            tool: tool.to_string(),
            pattern: pattern.to_string(),
        }
    }
}

fn default_steps() -> Vec<StepConfig> {
    let step = |name: &str, description: &str, requires: &[&str], triggers: Vec<StepTrigger>| StepConfig {
        name: name.to_string(),
        description: description.to_string(),
        requires_any: requires.iter().map(|s| s.to_string()).collect(),
        completed_by: triggers,
    };

    vec![
        step(
            "session_docs",
            "Read session docs (SESSION_HANDOFF.md, DEVELOPMENT.md)",
            &["SESSION_HANDOFF.md", "DEVELOPMENT.md"],
            vec![StepTrigger::new("Read", r"(?:SESSION_HANDOFF|DEVELOPMENT)\.md$")],
        ),
        step(
            "skills_registry",
            "Read ~/.claude/SKILLS_REGISTRY.md",
            &["~/.claude/SKILLS_REGISTRY.md"],
            vec![StepTrigger::new("Read", r"SKILLS_REGISTRY\.md$")],
        ),
        step(
            "validation_report",
            "Run: ruby scripts/validation_report.rb",
            &["scripts/validation_report.rb"],
            vec![StepTrigger::new("Bash", r"validation_report\.rb")],
        ),
        step(
            "orphan_cleanup",
            "Kill orphaned agent processes",
            &[],
            vec![StepTrigger::new("Bash", r"\b(?:pgrep|pkill)\b|\bps\s+|\bkill\s+")],
        ),
        step(
            "system_clean",
            "Run: ./scripts/SaneMaster.rb clean_system",
            &["scripts/SaneMaster.rb"],
            vec![StepTrigger::new("Bash", r"SaneMaster\.rb\s+clean_system")],
        ),
    ]
}

/// Helper struct for storing the location to read/write global settings
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    /// Config lives at `<warden_home>/config.json`.
    pub fn new(warden_home: &Path) -> Self {
        Self {
            path: warden_home.join("config.json"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the saved config, or fall back to defaults.
    pub fn load(&self) -> Config {
        let Ok(content) = fs::read_to_string(&self.path) else {
            return Config::default();
        };
        match serde_json::from_str(&content) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "ignoring unreadable config");
                Config::default()
            }
        }
    }

    /// Save the config back to disk.
    pub fn save(&self, config: &Config) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(config)?;
        fs::write(&self.path, content)
    }
}

/// `<project>/.warden/project.json`. Its presence marks a governed project.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectManifest {
    /// App name used to look up release clearance.
    pub app: Option<String>,
}

impl ProjectManifest {
    /// `None` when the project is not governed.
    ///
    /// A manifest that exists but cannot be parsed still marks the project
    /// as governed; it just names no app.
    pub async fn load(path: &Path) -> Result<Option<Self>, WardenError> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str(&content) {
            Ok(manifest) => Ok(Some(manifest)),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "malformed project manifest");
                Ok(Some(Self::default()))
            }
        }
    }

    pub async fn save(&self, path: &Path) -> Result<(), WardenError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, serde_json::to_vec_pretty(self)?).await?;
        Ok(())
    }

    pub fn app(&self) -> Option<&str> {
        self.app.as_deref().map(str::trim).filter(|a| !a.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_backward_compatible_defaults() {
        let legacy = r#"{"git_timeout_secs": 2}"#;
        let parsed: Config = serde_json::from_str(legacy).unwrap();
        assert_eq!(parsed.git_timeout_secs, 2);
        assert_eq!(parsed.release_flags, vec!["--full", "--deploy"]);
        assert_eq!(parsed.startup_steps.len(), 5);
        assert!(parsed.startup_steps.iter().any(|s| s.name == "orphan_cleanup" && s.requires_any.is_empty()));
    }

    #[test]
    fn test_config_store_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(&dir.path().join(".warden"));
        assert_eq!(store.load(), Config::default());

        let mut config = Config::default();
        config.startup_steps.truncate(1);
        config.git_timeout_secs = 9;
        store.save(&config).unwrap();
        assert_eq!(store.load(), config);

        std::fs::write(store.path(), "{broken").unwrap();
        assert_eq!(store.load(), Config::default());
    }

    #[tokio::test]
    async fn test_manifest_presence_and_app() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".warden").join("project.json");
        assert_eq!(ProjectManifest::load(&path).await.unwrap(), None);

        ProjectManifest {
            app: Some("SaneBar".to_string()),
        }
        .save(&path)
        .await
        .unwrap();
        let manifest = ProjectManifest::load(&path).await.unwrap().unwrap();
        assert_eq!(manifest.app(), Some("SaneBar"));

        std::fs::write(&path, "not json").unwrap();
        let manifest = ProjectManifest::load(&path).await.unwrap().unwrap();
        assert_eq!(manifest.app(), None);
    }
}
