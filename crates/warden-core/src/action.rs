//! Tool-use events and the actions they describe.

use crate::error::WardenError;
use serde::{Deserialize, Serialize};

/// A tool call intercepted before or after it runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolEvent {
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: serde_json::Value,
    /// Present on post-tool-use events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_response: Option<serde_json::Value>,
}

impl ToolEvent {
    pub fn new(tool_name: impl Into<String>, tool_input: serde_json::Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            tool_input,
            tool_response: None,
        }
    }

    pub fn with_response(mut self, response: serde_json::Value) -> Self {
        self.tool_response = Some(response);
        self
    }

    /// Parse the governed fields of this event.
    pub fn action(&self) -> Result<ToolAction, WardenError> {
        ToolAction::parse(&self.tool_name, &self.tool_input)
    }
}

/// The part of a tool call that policy cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolAction {
    /// A shell command.
    Bash { command: String },
    /// A file read.
    Read { file_path: String },
    /// A file mutation through an editing tool.
    FileWrite { tool: String, file_path: String },
    /// Any other tool; only its name is governed.
    Other { tool: String },
}

impl ToolAction {
    /// Extract the fields policy needs from a raw tool call.
    ///
    /// Governed tools with missing fields are an error, never a pass.
    pub fn parse(tool_name: &str, input: &serde_json::Value) -> Result<Self, WardenError> {
        match tool_name {
            "Bash" => Ok(Self::Bash {
                command: required_str(tool_name, input, "command")?,
            }),
            "Read" => Ok(Self::Read {
                file_path: required_str(tool_name, input, "file_path")?,
            }),
            "Edit" | "MultiEdit" | "Write" => Ok(Self::FileWrite {
                tool: tool_name.to_string(),
                file_path: required_str(tool_name, input, "file_path")?,
            }),
            "NotebookEdit" => Ok(Self::FileWrite {
                tool: tool_name.to_string(),
                file_path: required_str(tool_name, input, "notebook_path")?,
            }),
            "" => Err(WardenError::InvalidEvent("event has no tool_name".to_string())),
            other => Ok(Self::Other {
                tool: other.to_string(),
            }),
        }
    }

    pub fn tool_name(&self) -> &str {
        match self {
            Self::Bash { .. } => "Bash",
            Self::Read { .. } => "Read",
            Self::FileWrite { tool, .. } | Self::Other { tool } => tool,
        }
    }

    /// Command line or file path the action targets, if any.
    pub fn subject(&self) -> Option<&str> {
        match self {
            Self::Bash { command } => Some(command),
            Self::Read { file_path } | Self::FileWrite { file_path, .. } => Some(file_path),
            Self::Other { .. } => None,
        }
    }

    /// Whether the action can change state or have irreversible effects.
    pub fn is_mutating(&self) -> bool {
        is_mutating_tool(self.tool_name())
    }

    /// One-line description for block messages.
    pub fn describe(&self) -> String {
        match self {
            Self::Bash { command } => format!("Bash `{}`", truncate(command, 80)),
            Self::Read { file_path } => format!("Read {file_path}"),
            Self::FileWrite { tool, file_path } => format!("{tool} {file_path}"),
            Self::Other { tool } => tool.clone(),
        }
    }
}

/// Tools that never change anything: reading, searching, asking.
pub fn is_read_only_tool(tool_name: &str) -> bool {
    matches!(
        tool_name,
        "Read"
            | "Grep"
            | "Glob"
            | "LS"
            | "WebSearch"
            | "WebFetch"
            | "AskUserQuestion"
            | "ToolSearch"
            | "ListMcpResourcesTool"
            | "ReadMcpResourceTool"
            | "TodoWrite"
    ) || tool_name.starts_with("mcp__")
}

/// Tools whose effects policy must be able to stop.
pub fn is_mutating_tool(tool_name: &str) -> bool {
    matches!(
        tool_name,
        "Task" | "Edit" | "MultiEdit" | "Write" | "NotebookEdit" | "Bash" | "Skill"
    )
}

fn required_str(tool: &str, input: &serde_json::Value, field: &str) -> Result<String, WardenError> {
    match input.get(field).and_then(|v| v.as_str()) {
        Some(value) if !value.trim().is_empty() => Ok(value.to_string()),
        _ => Err(WardenError::InvalidEvent(format!(
            "{tool} event is missing tool_input.{field}"
        ))),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{cut}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_governed_tools() {
        assert_eq!(
            ToolAction::parse("Bash", &json!({"command": "ls"})).unwrap(),
            ToolAction::Bash {
                command: "ls".to_string()
            }
        );
        assert_eq!(
            ToolAction::parse("NotebookEdit", &json!({"notebook_path": "a.ipynb"})).unwrap(),
            ToolAction::FileWrite {
                tool: "NotebookEdit".to_string(),
                file_path: "a.ipynb".to_string()
            }
        );
    }

    #[test]
    fn test_missing_fields_are_errors() {
        assert!(ToolAction::parse("Bash", &json!({})).is_err());
        assert!(ToolAction::parse("Bash", &json!({"command": "   "})).is_err());
        assert!(ToolAction::parse("Edit", &json!({"old_string": "a"})).is_err());
        assert!(ToolAction::parse("", &json!({})).is_err());
    }

    #[test]
    fn test_unknown_tools_pass_through_as_other() {
        let action = ToolAction::parse("SomethingNew", &json!(null)).unwrap();
        assert_eq!(action.tool_name(), "SomethingNew");
        assert!(!action.is_mutating());
        assert_eq!(action.subject(), None);
    }

    #[test]
    fn test_tool_matrix() {
        for tool in ["Read", "Grep", "Glob", "WebFetch", "mcp__memory__read_graph"] {
            assert!(is_read_only_tool(tool), "{tool}");
            assert!(!is_mutating_tool(tool), "{tool}");
        }
        for tool in ["Task", "Edit", "Write", "NotebookEdit", "Bash", "Skill"] {
            assert!(is_mutating_tool(tool), "{tool}");
            assert!(!is_read_only_tool(tool), "{tool}");
        }
    }

    #[test]
    fn test_describe_truncates_long_commands() {
        let action = ToolAction::Bash {
            command: "x".repeat(200),
        };
        let text = action.describe();
        assert!(text.len() < 100);
        assert!(text.ends_with("...`"));
    }
}
