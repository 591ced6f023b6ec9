use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::PersistenceConfig;
use crate::daemon::{Daemon, Lifecycle, Member, RemoteObject};
use crate::storage::{PersistedField, PersistentStore};
use crate::{Error, Result};

/// Periodically saves a daemon's persisted fields as one batch
pub struct PersistenceScheduler {
    store: Box<dyn PersistentStore>,
    save_interval: Duration,
    poll_interval: Duration,
    last_save: Instant,
}

impl PersistenceScheduler {
    /// Fails with a config error when the poll interval is zero
    pub fn new(store: Box<dyn PersistentStore>, config: &PersistenceConfig) -> Result<Self> {
        if config.poll_interval_secs == 0 {
            return Err(Error::Config(
                "persistence poll_interval_secs must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            store,
            save_interval: config.save_interval(),
            poll_interval: config.poll_interval(),
            last_save: Instant::now(),
        })
    }

    pub fn with_intervals(mut self, save_interval: Duration, poll_interval: Duration) -> Self {
        self.save_interval = save_interval;
        self.poll_interval = poll_interval;
        self
    }

    /// Assign the last saved batch onto `daemon`. Returns how many fields were restored.
    pub async fn load_into(&self, daemon: &dyn RemoteObject) -> Result<usize> {
        let fields = self.store.load().await?;
        let mut restored = 0;

        for (name, value) in fields {
            match daemon.set(&name, value) {
                Ok(()) => restored += 1,
                Err(e) => warn!("Skipping persisted field '{}': {}", name, e),
            }
        }

        info!(
            "Restored {} persisted fields from {} storage",
            restored,
            self.store.name()
        );
        Ok(restored)
    }

    /// Current values of every registered persisted field
    pub fn collect(daemon: &dyn Daemon) -> Vec<PersistedField> {
        daemon
            .persisted_fields()
            .into_iter()
            .filter_map(|name| match daemon.get(&name) {
                Ok(Member::Value(value)) => Some((name, value)),
                Ok(Member::Method) => {
                    warn!("Persisted field '{}' is a method, not saving it", name);
                    None
                }
                Err(e) => {
                    debug!("Persisted field '{}' not available: {}", name, e);
                    None
                }
            })
            .collect()
    }

    /// Save if the save interval has elapsed. Returns whether a batch was saved.
    pub async fn tick(&mut self, daemon: &dyn Daemon) -> Result<bool> {
        if self.last_save.elapsed() < self.save_interval {
            return Ok(false);
        }

        let fields = Self::collect(daemon);
        let saved = !fields.is_empty();
        if saved {
            self.store.save(&fields).await?;
            debug!("Saved {} persisted fields", fields.len());
        }
        self.last_save = Instant::now();
        Ok(saved)
    }

    /// Run until the daemon stops. A failed save ends the loop with the error.
    pub async fn run(mut self, daemon: Arc<dyn Daemon>, lifecycle: Lifecycle) -> Result<()> {
        info!(
            "Persistence scheduler started: backend={}, save={}s, poll={}s",
            self.store.name(),
            self.save_interval.as_secs(),
            self.poll_interval.as_secs()
        );

        self.last_save = Instant::now();
        while lifecycle.is_running() {
            if let Err(e) = self.tick(daemon.as_ref()).await {
                error!("Saving persisted fields failed: {}", e);
                return Err(e);
            }
            lifecycle.sleep(self.poll_interval).await;
        }

        info!("Persistence scheduler stopped");
        Ok(())
    }
}
