//! Persistent storage for daemon fields
//!
//! A backend stores one batch of `(name, value)` pairs per daemon. Every save
//! replaces the previous batch as a whole.

mod file_store;
mod memory_store;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::AppConfig;
use crate::{Error, Result};

pub use file_store::FileStore;
pub use memory_store::MemoryStore;

/// A persisted field: its name and current value
pub type PersistedField = (String, Value);

#[async_trait]
pub trait PersistentStore: Send + Sync {
    /// Backend name, for logs
    fn name(&self) -> &str;

    /// Load the last saved batch, empty if nothing was saved yet
    async fn load(&self) -> Result<Vec<PersistedField>>;

    /// Replace the saved batch with `fields`
    async fn save(&self, fields: &[PersistedField]) -> Result<()>;
}

/// Build the backend selected by `[persistence] backend`
pub fn open_store(config: &AppConfig, daemon_name: &str) -> Result<Box<dyn PersistentStore>> {
    match config.persistence.backend.as_str() {
        "file" => {
            let store = FileStore::new(config.persistence_path(daemon_name));
            tracing::debug!("Persisting {} fields to {}", daemon_name, store.path().display());
            Ok(Box::new(store))
        }
        "memory" => Ok(Box::new(MemoryStore::new())),
        "" => Err(Error::Config(
            "persistence backend must be set".to_string(),
        )),
        other => Err(Error::Config(format!(
            "unknown persistence backend '{}'",
            other
        ))),
    }
}
