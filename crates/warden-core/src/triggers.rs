//! Declarative registries of prompt triggers, modifiers and frustration
//! signals.
//!
//! Tables are compiled once on first use. Matching is pure: nothing here
//! touches state.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// How a detected trigger affects the requirement set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    /// Starts a new task: replaces outstanding requirements.
    FreshStart,
    /// Layers onto the task in progress.
    Additive,
    /// Interrupts the current action.
    Immediate,
    /// Ends the session.
    Closing,
    /// Break-glass toggle for the whole policy layer.
    Bypass,
    /// User approval to skip a research category.
    SkipResearch,
    /// User approval to reset the circuit breaker.
    BreakerReset,
    /// User asks for the breaker state.
    BreakerStatus,
    /// User asks whether bypass is on.
    BypassStatus,
    /// User clears research skip approvals.
    ResearchReset,
    /// User asks which reset commands exist.
    ResetHelp,
}

impl TriggerKind {
    /// Control triggers run their own flow instead of merging.
    pub fn is_control(self) -> bool {
        !matches!(self, Self::FreshStart | Self::Additive | Self::Immediate | Self::Closing)
    }
}

#[derive(Debug)]
pub struct TriggerDef {
    pub name: &'static str,
    /// What the agent is expected to do.
    pub action: &'static str,
    pub kind: TriggerKind,
    patterns: &'static [&'static str],
}

#[derive(Debug)]
pub struct SignalDef {
    pub name: &'static str,
    pub meaning: &'static str,
    patterns: &'static [&'static str],
}

pub static TRIGGERS: &[TriggerDef] = &[
    TriggerDef {
        name: "saneloop",
        action: "Start a work loop with explicit acceptance criteria",
        kind: TriggerKind::FreshStart,
        patterns: &[r"\bsaneloop\b", r"\bsane.?loop\b", r"\bdo a.*loop\b"],
    },
    TriggerDef {
        name: "research",
        action: "Follow the research protocol: memory first, then docs and web",
        kind: TriggerKind::Additive,
        patterns: &[r"\bresearch this\b", r"\bresearch first\b", r"\bdo research\b"],
    },
    TriggerDef {
        name: "bypass",
        action: "Toggle enforcement (user-only keyword)",
        kind: TriggerKind::Bypass,
        patterns: &[
            r"\bbypass\s+on\b",
            r"\bbypass\s+off\b",
            r"\benable\s+bypass\b",
            r"\bturn\s+off\s+enforcement\b",
        ],
    },
    TriggerDef {
        name: "plan",
        action: "Show the plan in plain English for approval",
        kind: TriggerKind::Additive,
        patterns: &[r"\bmake a plan\b", r"\bplan this\b", r"\bplan first\b", r"\bcreate a plan\b"],
    },
    TriggerDef {
        name: "explain",
        action: "Use plain English and define technical terms",
        kind: TriggerKind::Additive,
        patterns: &[r"\bexplain\b", r"\bwhat does.*mean\b", r"\bwhy\b.*\?"],
    },
    TriggerDef {
        name: "commit",
        action: "Pull, review status and diff, then add and commit",
        kind: TriggerKind::FreshStart,
        patterns: &[r"\bcommit\b", r"\bpush\b", r"\bgit commit\b"],
    },
    TriggerDef {
        name: "bug_note",
        action: "Update the bug log and memory, check for patterns",
        kind: TriggerKind::Additive,
        patterns: &[r"\bmake note.*bug\b", r"\bnote this bug\b", r"\blog.*bug\b", r"\bcheck bug\b"],
    },
    TriggerDef {
        name: "test_mode",
        action: "Kill, build, launch, stream logs",
        kind: TriggerKind::FreshStart,
        patterns: &[r"\btest mode\b"],
    },
    TriggerDef {
        name: "verify",
        action: "Full verification with a checklist",
        kind: TriggerKind::Additive,
        patterns: &[r"\bverify everything\b", r"\bmake sure everything\b", r"\bcheck everything\b"],
    },
    TriggerDef {
        name: "show",
        action: "Display the content directly instead of describing it",
        kind: TriggerKind::Additive,
        patterns: &[r"\bshow me\b", r"\blet me see\b", r"\bdisplay\b"],
    },
    TriggerDef {
        name: "remember",
        action: "Store it in memory",
        kind: TriggerKind::Additive,
        patterns: &[r"\bremember\b", r"\bsave this\b", r"\bstore this\b", r"\bdon'?t forget\b"],
    },
    TriggerDef {
        name: "stop",
        action: "Interrupt the current action immediately",
        kind: TriggerKind::Immediate,
        patterns: &[r"\bstop\b", r"\bwait\b", r"\bhold on\b", r"\bhang on\b"],
    },
    TriggerDef {
        name: "session_end",
        action: "Write the compliance summary, then end the session",
        kind: TriggerKind::Closing,
        patterns: &[
            r"\bwrap up\b",
            r"\bend session\b",
            r"\bwrap up session\b",
            r"\bclose.*session\b",
            r"\bfinish up\b",
        ],
    },
    TriggerDef {
        name: "skip_research",
        action: "User approves skipping a research category",
        kind: TriggerKind::SkipResearch,
        patterns: &[
            r"\bskip\s+(?:memory|docs|web|local|github)\b",
            r"\bapprove\s+skip\s+(?:memory|docs|web|local|github)\b",
            r"\b(?:memory|docs|web|local|github)\s+not\s+(?:needed|applicable|relevant)\b",
        ],
    },
    TriggerDef {
        name: "reset_breaker",
        action: "User approves resetting the circuit breaker",
        kind: TriggerKind::BreakerReset,
        patterns: &[
            r"\breset\s+breaker\b",
            r"\bapprove\s+breaker\s+reset\b",
            r"\bclear\s+breaker\b",
            r"\breset\s+circuit\b",
            r"^\s*rb[-+]",
        ],
    },
    TriggerDef {
        name: "breaker_status",
        action: "Show the circuit breaker state",
        kind: TriggerKind::BreakerStatus,
        patterns: &[r"^\s*rb\?", r"\bbreaker\s+status\b"],
    },
    TriggerDef {
        name: "bypass_status",
        action: "Show whether enforcement is bypassed",
        kind: TriggerKind::BypassStatus,
        patterns: &[r"^\s*s\?", r"\bbypass\s+status\b"],
    },
    TriggerDef {
        name: "reset_research",
        action: "Clear research skip approvals so every category is covered again",
        kind: TriggerKind::ResearchReset,
        patterns: &[r"^\s*rr-", r"\breset\s+research\b"],
    },
    TriggerDef {
        name: "reset_help",
        action: "List the reset and status commands",
        kind: TriggerKind::ResetHelp,
        patterns: &[r"^\s*resets?\?"],
    },
];

pub static MODIFIERS: &[SignalDef] = &[
    SignalDef {
        name: "first",
        meaning: "Do this before any other action",
        patterns: &[r"first\b", r"\bbefore anything\b", r"\bbefore you\b"],
    },
    SignalDef {
        name: "just",
        meaning: "Minimal scope, do not over-engineer",
        patterns: &[r"\bjust\b", r"\bonly\b", r"\bminimal\b"],
    },
    SignalDef {
        name: "quick",
        meaning: "Speed matters but verification still happens",
        patterns: &[r"\bquick\b", r"\bquickly\b", r"\bfast\b"],
    },
    SignalDef {
        name: "everything",
        meaning: "Leave no stone unturned",
        patterns: &[r"\beverything\b", r"\babsolutely\b", r"\ball\b", r"\bcomprehensive\b"],
    },
    SignalDef {
        name: "careful",
        meaning: "Extra attention required",
        patterns: &[r"\bcareful\b", r"\bcarefully\b", r"\bthoroughly\b"],
    },
    SignalDef {
        name: "again",
        meaning: "The previous attempt failed; use a different approach",
        patterns: &[r"\bagain\b", r"\btry again\b", r"\bone more time\b"],
    },
];

pub static FRUSTRATION_SIGNALS: &[SignalDef] = &[
    SignalDef {
        name: "correction",
        meaning: "The request was misunderstood",
        patterns: &[r"^no[,.]?\s", r"\bthat'?s not\b", r"\bi said\b", r"\bi already\b", r"\bi meant\b"],
    },
    SignalDef {
        name: "impatience",
        meaning: "Slow down and think it through",
        patterns: &[r"\bidiot\b", r"\buse your head\b", r"\bthink\b", r"\bstop rushing\b"],
    },
    SignalDef {
        name: "skepticism",
        meaning: "The user doubts the last answer; verify before continuing",
        patterns: &[r"\.\.\.$", r"\breally\?", r"\bare you sure\b", r"\bhmm\b"],
    },
    SignalDef {
        name: "repetition",
        meaning: "An earlier instruction was ignored; check the history",
        patterns: &[r"\bi just said\b", r"\blike i said\b", r"\bas i mentioned\b"],
    },
];

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(&format!("(?im){p}")).expect("registry patterns are valid"))
        .collect()
}

static COMPILED_TRIGGERS: Lazy<Vec<(&'static TriggerDef, Vec<Regex>)>> =
    Lazy::new(|| TRIGGERS.iter().map(|t| (t, compile(t.patterns))).collect());
static COMPILED_MODIFIERS: Lazy<Vec<(&'static SignalDef, Vec<Regex>)>> =
    Lazy::new(|| MODIFIERS.iter().map(|m| (m, compile(m.patterns))).collect());
static COMPILED_FRUSTRATION: Lazy<Vec<(&'static SignalDef, Vec<Regex>)>> =
    Lazy::new(|| FRUSTRATION_SIGNALS.iter().map(|f| (f, compile(f.patterns))).collect());

static SKIP_CATEGORY: Lazy<[Regex; 2]> = Lazy::new(|| {
    [
        Regex::new(r"(?i)\b(?:approve\s+)?skip\s+(memory|docs|web|local|github)\b").expect("valid regex"),
        Regex::new(r"(?i)\b(memory|docs|web|local|github)\s+not\s+(?:needed|applicable|relevant)\b")
            .expect("valid regex"),
    ]
});

static BYPASS_OFF: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bbypass\s+off\b").expect("valid regex"));

fn detect<T>(text: &str, table: &[(&'static T, Vec<Regex>)]) -> Vec<&'static T> {
    table
        .iter()
        .filter(|(_, patterns)| patterns.iter().any(|re| re.is_match(text)))
        .map(|(def, _)| *def)
        .collect()
}

/// Triggers present in `text`, in registry order.
pub fn detect_triggers(text: &str) -> Vec<&'static TriggerDef> {
    detect(text, &COMPILED_TRIGGERS)
}

pub fn detect_modifiers(text: &str) -> Vec<&'static SignalDef> {
    detect(text, &COMPILED_MODIFIERS)
}

pub fn detect_frustration(text: &str) -> Vec<&'static SignalDef> {
    detect(text, &COMPILED_FRUSTRATION)
}

/// Whether a bypass prompt asks to turn enforcement back on.
pub fn is_bypass_off(text: &str) -> bool {
    BYPASS_OFF.is_match(text)
}

/// Research categories an agent can be required to cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResearchCategory {
    Memory,
    Docs,
    Web,
    Local,
    Github,
}

impl ResearchCategory {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "memory" => Some(Self::Memory),
            "docs" => Some(Self::Docs),
            "web" => Some(Self::Web),
            "local" => Some(Self::Local),
            "github" => Some(Self::Github),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Docs => "docs",
            Self::Web => "web",
            Self::Local => "local",
            Self::Github => "github",
        }
    }
}

/// The category a skip request names, if it names one.
pub fn skip_category(text: &str) -> Option<ResearchCategory> {
    SKIP_CATEGORY
        .iter()
        .find_map(|re| re.captures(text))
        .and_then(|caps| caps.get(1))
        .and_then(|m| ResearchCategory::parse(m.as_str()))
}
