//! Signed state documents on disk.
//!
//! Every document is stored as `{"payload": ..., "signature": "<hex>"}`.
//! Writes go to a temp file in the same directory and are renamed into place,
//! so a racing reader sees either the old document or the new one.

use crate::error::WardenError;
use crate::signer::Signer;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tokio::fs;

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct SignedDocument {
    payload: serde_json::Value,
    signature: String,
}

/// Why a stored document could not be trusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityFailure {
    /// Not valid JSON, or not in the signed-document shape.
    Malformed(String),
    /// Signature does not match the payload.
    SignatureMismatch,
    /// Signature verified but the payload does not fit the expected schema.
    SchemaMismatch(String),
    /// No key is loaded, so nothing can be verified.
    KeyUnavailable,
}

impl fmt::Display for IntegrityFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(e) => write!(f, "malformed document ({e})"),
            Self::SignatureMismatch => f.write_str("signature mismatch"),
            Self::SchemaMismatch(e) => write!(f, "unexpected payload ({e})"),
            Self::KeyUnavailable => f.write_str("signing key unavailable"),
        }
    }
}

/// What was found at a document's location.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentState<T> {
    /// No file.
    Absent,
    /// A file exists but cannot be trusted.
    Untrusted(IntegrityFailure),
    /// A verified payload.
    Trusted(T),
}

impl<T> DocumentState<T> {
    pub fn into_trusted(self) -> Option<T> {
        match self {
            Self::Trusted(value) => Some(value),
            Self::Absent | Self::Untrusted(_) => None,
        }
    }
}

/// Reads and writes signed documents.
///
/// This is the only place a signature is produced or checked.
#[derive(Debug, Clone)]
pub struct StateStore {
    signer: Signer,
}

impl StateStore {
    pub fn new(signer: Signer) -> Self {
        Self { signer }
    }

    /// Classify the document at `path`.
    ///
    /// Only I/O failures other than "not found" are errors.
    pub async fn load<T: DeserializeOwned>(&self, path: &Path) -> Result<DocumentState<T>, WardenError> {
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(DocumentState::Absent),
            Err(e) => return Err(e.into()),
        };

        let state = self.verify_bytes(&bytes);
        if let DocumentState::Untrusted(ref failure) = state {
            tracing::warn!(path = %path.display(), %failure, "state document failed verification");
        }
        Ok(state)
    }

    /// Verified payload at `path`, or `None` for anything untrustworthy.
    ///
    /// Never fails: missing, malformed, tampered and unreadable documents
    /// all read as "no trustworthy state".
    pub async fn read_verified<T: DeserializeOwned>(&self, path: &Path) -> Option<T> {
        match self.load(path).await {
            Ok(state) => state.into_trusted(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "state document unreadable");
                None
            }
        }
    }

    /// Sign `payload` and atomically replace the document at `path`.
    ///
    /// No retry: a failed write is returned to the caller.
    pub async fn write_signed<T: Serialize>(&self, path: &Path, payload: &T) -> Result<(), WardenError> {
        let payload = serde_json::to_value(payload)?;
        let signature = self.signer.sign(&payload)?;
        let document = SignedDocument { payload, signature };
        let content = serde_json::to_vec_pretty(&document)?;

        let parent = path
            .parent()
            .ok_or_else(|| WardenError::Config(format!("state path has no parent: {}", path.display())))?;
        fs::create_dir_all(parent).await?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "state".to_string());
        let tmp = parent.join(format!(".{file_name}.{}.tmp", ulid::Ulid::new()));

        fs::write(&tmp, &content).await?;
        if let Err(e) = fs::rename(&tmp, path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        tracing::debug!(path = %path.display(), "wrote signed state document");
        Ok(())
    }

    /// Delete the document at `path`. Returns whether anything was removed.
    pub async fn remove(&self, path: &Path) -> Result<bool, WardenError> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn verify_bytes<T: DeserializeOwned>(&self, bytes: &[u8]) -> DocumentState<T> {
        let document: SignedDocument = match serde_json::from_slice(bytes) {
            Ok(doc) => doc,
            Err(e) => return DocumentState::Untrusted(IntegrityFailure::Malformed(e.to_string())),
        };
        if !self.signer.has_key() {
            return DocumentState::Untrusted(IntegrityFailure::KeyUnavailable);
        }
        if !self.signer.verify(&document.payload, &document.signature) {
            return DocumentState::Untrusted(IntegrityFailure::SignatureMismatch);
        }
        match serde_json::from_value(document.payload) {
            Ok(value) => DocumentState::Trusted(value),
            Err(e) => DocumentState::Untrusted(IntegrityFailure::SchemaMismatch(e.to_string())),
        }
    }
}
