//! Keyed integrity tags over state documents.
//!
//! Payloads are canonicalized with JCS (RFC 8785: sorted keys, fixed number
//! formatting) before HMAC-SHA256, so the tag does not depend on how the
//! document was built. Without a key nothing verifies; there is no unsigned
//! trust mode.

use crate::error::WardenError;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::Serialize;
use sha2::Sha256;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tokio::fs;
use tokio::io::AsyncWriteExt;

type HmacSha256 = Hmac<Sha256>;

const SECRET_LEN_BYTES: usize = 32;
const SECRET_MAX_FILE_BYTES: u64 = 256;

/// Symmetric secret used for every state document.
#[derive(Clone)]
pub struct SecretKey(Arc<Vec<u8>>);

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(<redacted>)")
    }
}

impl SecretKey {
    /// Parse a hex-encoded 32-byte secret.
    pub fn from_hex(encoded: &str) -> Result<Self, WardenError> {
        let bytes = hex::decode(encoded.trim())
            .map_err(|e| WardenError::InvalidKey(format!("not hex: {e}")))?;
        if bytes.len() != SECRET_LEN_BYTES {
            return Err(WardenError::InvalidKey(format!(
                "expected {SECRET_LEN_BYTES} bytes, found {}",
                bytes.len()
            )));
        }
        Ok(Self(Arc::new(bytes)))
    }

    /// Generate a fresh random secret.
    pub fn generate() -> Self {
        let mut secret = vec![0u8; SECRET_LEN_BYTES];
        rand::rng().fill_bytes(&mut secret);
        Self(Arc::new(secret))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0.as_slice())
    }

    /// Load the secret from `path`. A missing file is `Ok(None)`.
    pub async fn load(path: &Path) -> Result<Option<Self>, WardenError> {
        let meta = match fs::metadata(path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if meta.len() > SECRET_MAX_FILE_BYTES {
            return Err(WardenError::InvalidKey(format!(
                "{} is larger than {SECRET_MAX_FILE_BYTES} bytes",
                path.display()
            )));
        }
        let content = fs::read_to_string(path).await?;
        Self::from_hex(&content).map(Some)
    }

    /// Generate a secret and write it to `path` with owner-only permissions.
    ///
    /// Refuses to replace an existing key unless `force` is set, since every
    /// signed document becomes unverifiable once the key changes.
    pub async fn create(path: &Path, force: bool) -> Result<Self, WardenError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let key = Self::generate();

        let mut options = fs::OpenOptions::new();
        options.write(true);
        if force {
            options.create(true).truncate(true);
        } else {
            options.create_new(true);
        }
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                WardenError::InvalidKey(format!(
                    "{} already exists; pass --force to rotate",
                    path.display()
                ))
            } else {
                WardenError::Io(e)
            }
        })?;
        file.write_all(format!("{}\n", key.to_hex()).as_bytes()).await?;
        file.flush().await?;
        Ok(key)
    }
}

/// Computes and checks integrity tags.
#[derive(Debug, Clone, Default)]
pub struct Signer {
    key: Option<SecretKey>,
}

impl Signer {
    pub fn new(key: Option<SecretKey>) -> Self {
        Self { key }
    }

    /// A signer with no key: `sign` fails, `verify` always returns false.
    pub fn unkeyed() -> Self {
        Self { key: None }
    }

    pub fn has_key(&self) -> bool {
        self.key.is_some()
    }

    /// Canonical byte form of `payload`.
    pub fn canonicalize<T: Serialize>(payload: &T) -> Result<Vec<u8>, WardenError> {
        Ok(serde_jcs::to_vec(payload)?)
    }

    /// Lowercase hex HMAC-SHA256 over the canonical form of `payload`.
    pub fn sign<T: Serialize>(&self, payload: &T) -> Result<String, WardenError> {
        let key = self
            .key
            .as_ref()
            .ok_or_else(|| WardenError::KeyUnavailable("no signing key loaded".to_string()))?;
        let canonical = Self::canonicalize(payload)?;
        Ok(hex::encode(compute_mac(key, &canonical)?))
    }

    /// Whether `tag` is the exact tag for `payload`.
    ///
    /// The hex strings themselves are compared in constant time, so an
    /// uppercase rendering of a valid tag does not verify.
    pub fn verify<T: Serialize>(&self, payload: &T, tag: &str) -> bool {
        let Some(key) = self.key.as_ref() else {
            return false;
        };
        let Ok(canonical) = Self::canonicalize(payload) else {
            return false;
        };
        let Ok(mac) = compute_mac(key, &canonical) else {
            return false;
        };
        let expected = hex::encode(mac);
        if expected.len() != tag.len() {
            return false;
        }
        expected.as_bytes().ct_eq(tag.as_bytes()).into()
    }
}

fn compute_mac(key: &SecretKey, payload: &[u8]) -> Result<Vec<u8>, WardenError> {
    let mut mac = HmacSha256::new_from_slice(key.0.as_slice())
        .map_err(|e| WardenError::InvalidKey(e.to_string()))?;
    mac.update(payload);
    Ok(mac.finalize().into_bytes().to_vec())
}
