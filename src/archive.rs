// SPDX-License-Identifier: AGPL-3.0-or-later

//! Peripheral persistence for documents: a JSON blob per document id,
//! written to a configured directory. The session layer is indifferent to
//! this format; only the registry's bootstrap hook and eviction sweep
//! (`SPEC_FULL.md` §4.B.1, §4.C.1) know it exists, and both treat its
//! failures as non-fatal, logging at `warn` rather than propagating.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::fs;
use tracing::debug;

/// The persisted shape of one document.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArchivedDocument {
    pub text: String,
    pub language: String,
    #[serde(with = "time::serde::rfc3339")]
    pub frozen_at: OffsetDateTime,
}

/// Errors from reading or writing an archived document.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("failed to read archive file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to (de)serialize archived document: {0}")]
    Serde(#[from] serde_json::Error),
}

/// File-backed archive collaborator.
pub struct Archive {
    directory: PathBuf,
}

impl Archive {
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    fn path_for(&self, document_id: &str) -> PathBuf {
        self.directory.join(format!("{document_id}.json"))
    }

    /// Loads the archived document for `document_id`, if any exists.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError`] if the file exists but cannot be read or
    /// parsed. A missing file is not an error; it yields `Ok(None)`.
    pub async fn load(&self, document_id: &str) -> Result<Option<ArchivedDocument>, ArchiveError> {
        let path = self.path_for(document_id);
        match fs::read(&path).await {
            Ok(bytes) => {
                let document: ArchivedDocument = serde_json::from_slice(&bytes)?;
                Ok(Some(document))
            }
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    /// Persists `text`/`language` for `document_id`, creating the archive
    /// directory if it doesn't yet exist.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError`] if the directory cannot be created or the
    /// file cannot be written.
    pub async fn store(
        &self,
        document_id: &str,
        text: String,
        language: String,
    ) -> Result<(), ArchiveError> {
        fs::create_dir_all(&self.directory).await?;
        let document = ArchivedDocument {
            text,
            language,
            frozen_at: now(),
        };
        let bytes = serde_json::to_vec_pretty(&document)?;
        let path = self.path_for(document_id);
        fs::write(&path, bytes).await?;
        debug!(document_id, path = %path.display(), "archived document");
        Ok(())
    }
}

fn now() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_through_a_temp_directory() {
        let dir = temp_dir::TempDir::new().unwrap();
        let archive = Archive::new(dir.path());
        archive
            .store("doc-1", "hello".to_string(), "plaintext".to_string())
            .await
            .unwrap();
        let loaded = archive.load("doc-1").await.unwrap().unwrap();
        assert_eq!(loaded.text, "hello");
        assert_eq!(loaded.language, "plaintext");
    }

    #[tokio::test]
    async fn missing_document_is_not_an_error() {
        let dir = temp_dir::TempDir::new().unwrap();
        let archive = Archive::new(dir.path());
        assert!(archive.load("nonexistent").await.unwrap().is_none());
    }
}

