//! Error types for the warden-core crate.

/// Core error type for the policy layer.
///
/// Integrity failures (tampered or malformed state) are not errors; they
/// surface as missing or untrusted state.
#[derive(Debug, thiserror::Error)]
pub enum WardenError {
    /// I/O error while reading or writing state
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No usable signing key; nothing can be signed
    #[error("Signing key unavailable: {0}")]
    KeyUnavailable(String),

    /// Key material present but unusable
    #[error("Invalid signing key: {0}")]
    InvalidKey(String),

    /// A governed event is missing required fields
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// Configuration could not be applied
    #[error("Config error: {0}")]
    Config(String),

    /// The current repository revision could not be determined
    #[error("Revision probe failed: {0}")]
    Revision(String),

    /// Journal append/read failure
    #[error("Journal error: {0}")]
    Journal(#[from] warden_journal::JournalError),
}
