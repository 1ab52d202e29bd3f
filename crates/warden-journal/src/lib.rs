//! warden-journal: append-only JSONL journals shared with external collaborators.

mod error;
pub mod format;
pub mod journal;

pub use error::JournalError;
pub use format::{AuditEntry, EnforcementEntry, EnforcementKind, FindingEntry, PromptLogEntry};
pub use journal::Journal;
