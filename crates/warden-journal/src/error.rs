//! Error types for the warden-journal crate.

/// Errors that can occur while appending to or reading a journal.
#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
