//! Checker verdicts and the decision returned to the enforcement point.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Why an action was blocked, phrased for the agent that attempted it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// What was blocked.
    pub what: String,
    /// Why it was blocked.
    pub why: String,
    /// The exact step that clears the block.
    pub remedy: String,
}

impl Block {
    pub fn new(what: impl Into<String>, why: impl Into<String>, remedy: impl Into<String>) -> Self {
        Self {
            what: what.into(),
            why: why.into(),
            remedy: remedy.into(),
        }
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "BLOCKED: {}", self.what)?;
        for line in self.why.lines() {
            writeln!(f, "   {line}")?;
        }
        writeln!(f)?;
        write!(f, "   Fix: {}", self.remedy)
    }
}

/// Outcome of a single checker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    Blocked(Block),
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// The answer handed back to the caller, which enforces it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub allowed: bool,
    /// Present when `allowed` is false; may also carry advisory text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Decision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            message: None,
        }
    }

    /// Allow, but pass a note along to the agent.
    pub fn allow_with(message: impl Into<String>) -> Self {
        Self {
            allowed: true,
            message: Some(message.into()),
        }
    }

    pub fn block(block: &Block) -> Self {
        Self {
            allowed: false,
            message: Some(block.to_string()),
        }
    }
}

impl From<Verdict> for Decision {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Allowed => Self::allow(),
            Verdict::Blocked(block) => Self::block(&block),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_message_has_what_why_fix() {
        let block = Block::new("Edit", "breaker tripped\n3 failures", "say \"reset breaker\"");
        let text = block.to_string();
        assert!(text.starts_with("BLOCKED: Edit"));
        assert!(text.contains("   breaker tripped\n   3 failures"));
        assert!(text.ends_with("Fix: say \"reset breaker\""));
    }

    #[test]
    fn test_blocked_verdict_becomes_denied_decision() {
        let decision: Decision = Verdict::Blocked(Block::new("a", "b", "c")).into();
        assert!(!decision.allowed);
        assert!(decision.message.unwrap().contains("BLOCKED: a"));
        assert_eq!(Decision::from(Verdict::Allowed), Decision::allow());
    }
}
