use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{PersistedField, PersistentStore};
use crate::{Error, Result};

/// Keeps the batch in memory. Clones share the same batch, so a test can
/// hand one clone to a daemon and inspect the other.
#[derive(Clone, Default)]
pub struct MemoryStore {
    fields: Arc<Mutex<Vec<PersistedField>>>,
    saves: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with an already saved batch
    pub fn with_fields(fields: Vec<PersistedField>) -> Self {
        let store = Self::new();
        if let Ok(mut guard) = store.fields.lock() {
            *guard = fields;
        }
        store
    }

    /// Number of completed saves
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<PersistedField>>> {
        self.fields
            .lock()
            .map_err(|_| Error::Storage("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn load(&self) -> Result<Vec<PersistedField>> {
        Ok(self.lock()?.clone())
    }

    async fn save(&self, fields: &[PersistedField]) -> Result<()> {
        *self.lock()? = fields.to_vec();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
