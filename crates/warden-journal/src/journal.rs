//! Append-only JSONL journal.

use crate::error::JournalError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// An append-only JSONL file holding entries of type `T`.
///
/// Writers only ever append whole lines. Readers tolerate lines they cannot
/// parse (other tools share some of these files), skipping them.
#[derive(Debug, Clone)]
pub struct Journal<T> {
    path: PathBuf,
    _entry: PhantomData<fn() -> T>,
}

impl<T> Journal<T> {
    /// Open a journal at `path`. Nothing is touched until the first append.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _entry: PhantomData,
        }
    }

    /// Location of the journal file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<T: Serialize> Journal<T> {
    /// Append a single entry as one line.
    pub async fn append(&self, entry: &T) -> Result<(), JournalError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let line = serde_json::to_string(entry)?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        // One write call per line keeps concurrent appenders from interleaving.
        file.write_all(format!("{line}\n").as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

impl<T: DeserializeOwned> Journal<T> {
    /// Read every parseable entry. A missing file is an empty journal.
    pub async fn read_all(&self) -> Result<Vec<T>, JournalError> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for (line_num, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::debug!(
                    path = %self.path.display(),
                    line = line_num + 1,
                    error = %e,
                    "skipping unparseable journal line"
                ),
            }
        }
        Ok(entries)
    }

    /// First entry satisfying `predicate`, in file order.
    pub async fn find_first<F>(&self, predicate: F) -> Result<Option<T>, JournalError>
    where
        F: Fn(&T) -> bool,
    {
        Ok(self.read_all().await?.into_iter().find(|e| predicate(e)))
    }
}
