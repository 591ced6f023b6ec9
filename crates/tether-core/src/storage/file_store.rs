use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{PersistedField, PersistentStore};
use crate::{Error, Result};

/// Stores the batch as a JSON array of `[name, value]` pairs in one file
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl PersistentStore for FileStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn load(&self) -> Result<Vec<PersistedField>> {
        let content = match tokio::fs::read(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::Storage(format!(
                    "could not read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        serde_json::from_slice(&content).map_err(|e| {
            Error::Storage(format!(
                "could not load persisted fields from {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    async fn save(&self, fields: &[PersistedField]) -> Result<()> {
        let content = serde_json::to_vec(fields)
            .map_err(|e| Error::Storage(format!("could not encode persisted fields: {}", e)))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    Error::Storage(format!("could not create {}: {}", parent.display(), e))
                })?;
            }
        }

        // Write then rename so a crash never leaves half a batch behind
        let temp = self.temp_path();
        tokio::fs::write(&temp, content).await.map_err(|e| {
            Error::Storage(format!("could not write {}: {}", temp.display(), e))
        })?;
        tokio::fs::rename(&temp, &self.path).await.map_err(|e| {
            Error::Storage(format!(
                "could not save persisted fields to {}: {}",
                self.path.display(),
                e
            ))
        })?;

        tracing::debug!("Saved {} persisted fields to {}", fields.len(), self.path.display());
        Ok(())
    }
}
