//! JSON file store with atomic replace.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::ArtifactKey;
use crate::error::{HistoryError, Result};

/// Stored artifact with its write timestamp
#[derive(Serialize, Deserialize)]
struct ArtifactEntry<T> {
    data: T,
    saved_at: DateTime<Utc>,
}

/// Directory of JSON artifacts.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    base_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn path(&self, key: &ArtifactKey) -> PathBuf {
        self.base_dir.join(key.file_name())
    }

    pub fn exists(&self, key: &ArtifactKey) -> bool {
        self.path(key).exists()
    }

    /// Read an artifact. A missing file is `Ok(None)`; an unreadable or
    /// corrupt one is a persistence error the caller may treat as a miss.
    pub fn load<T: DeserializeOwned>(&self, key: &ArtifactKey) -> Result<Option<T>> {
        let path = self.path(key);
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path)
            .map_err(|e| HistoryError::persistence(key.file_name(), e))?;
        let entry: ArtifactEntry<T> = serde_json::from_str(&content)
            .map_err(|e| HistoryError::persistence(key.file_name(), e))?;

        debug!("Loaded {} (saved {})", key.file_name(), entry.saved_at);
        Ok(Some(entry.data))
    }

    /// Write an artifact via a temp file in the same directory, then rename
    /// over the previous snapshot.
    pub fn save<T: Serialize>(&self, key: &ArtifactKey, data: &T) -> Result<()> {
        let name = key.file_name();
        std::fs::create_dir_all(&self.base_dir).map_err(|e| HistoryError::persistence(&name, e))?;

        let entry = ArtifactEntry {
            data,
            saved_at: Utc::now(),
        };

        let mut tmp = tempfile::NamedTempFile::new_in(&self.base_dir)
            .map_err(|e| HistoryError::persistence(&name, e))?;
        serde_json::to_writer_pretty(&mut tmp, &entry)
            .map_err(|e| HistoryError::persistence(&name, e))?;
        tmp.flush().map_err(|e| HistoryError::persistence(&name, e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| HistoryError::persistence(&name, e))?;
        tmp.persist(self.path(key))
            .map_err(|e| HistoryError::persistence(&name, e.error))?;

        debug!("Saved {}", name);
        Ok(())
    }

    /// Delete every artifact in the store. Other files in the directory are left alone.
    pub fn clear_all(&self) -> Result<usize> {
        let dir = self.base_dir.display().to_string();
        let entries = match std::fs::read_dir(&self.base_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(HistoryError::persistence(dir, e)),
        };

        let mut removed = 0;
        for entry in entries {
            let entry = entry.map_err(|e| HistoryError::persistence(&dir, e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !ArtifactKey::is_artifact_file(name) || !entry.path().is_file() {
                continue;
            }
            std::fs::remove_file(entry.path()).map_err(|e| HistoryError::persistence(name, e))?;
            removed += 1;
        }
        debug!("Removed {} artifacts from {}", removed, dir);
        Ok(removed)
    }
}
