use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::info;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Running,
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Created => "created",
            LifecycleState::Running => "running",
            LifecycleState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Shared running state of a daemon.
///
/// Cloned into the listener, the scheduler and the daemon's main loop. Any
/// clone can stop the daemon.
#[derive(Clone)]
pub struct Lifecycle {
    tx: Arc<watch::Sender<LifecycleState>>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(LifecycleState::Created);
        Self { tx: Arc::new(tx) }
    }

    pub fn state(&self) -> LifecycleState {
        *self.tx.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state() == LifecycleState::Running
    }

    /// Move from created to running
    pub(crate) fn start(&self) -> Result<()> {
        let mut previous = LifecycleState::Created;
        let started = self.tx.send_if_modified(|state| {
            previous = *state;
            if *state == LifecycleState::Created {
                *state = LifecycleState::Running;
                true
            } else {
                false
            }
        });
        if started {
            Ok(())
        } else {
            Err(Error::Lifecycle(format!(
                "cannot start a daemon that is {}",
                previous
            )))
        }
    }

    /// Stop the daemon. Stopping twice is a no-op.
    pub fn stop(&self) {
        let stopped = self.tx.send_if_modified(|state| {
            if *state == LifecycleState::Stopped {
                false
            } else {
                *state = LifecycleState::Stopped;
                true
            }
        });
        if stopped {
            info!("Daemon stopping");
        }
    }

    /// Resolve once the daemon is stopped
    pub async fn stopped(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in self, so the channel cannot close here
        let _ = rx.wait_for(|state| *state == LifecycleState::Stopped).await;
    }

    /// Sleep for `duration` or until stopped. Returns whether still running.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.stopped() => {}
        }
        self.is_running()
    }
}

/// Process context a daemon runs in while started (e.g. detached from the
/// terminal). Daemonization itself lives outside this crate.
pub trait ProcessContext: Send + Sync {
    fn enter(&self) -> Result<()>;
    fn leave(&self);
}

/// Stay in the foreground
#[derive(Debug, Default, Clone, Copy)]
pub struct Foreground;

impl ProcessContext for Foreground {
    fn enter(&self) -> Result<()> {
        Ok(())
    }

    fn leave(&self) {}
}
