use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{debug, error, info};

use super::{Daemon, Evaluator, Foreground, Lifecycle, ProcessContext, RemoteObject, Resolver};
use crate::config::AppConfig;
use crate::ipc::Listener;
use crate::scheduler::PersistenceScheduler;
use crate::storage::{open_store, PersistentStore};
use crate::{Error, Result};

/// Runs a daemon together with its listener and persistence scheduler.
///
/// Construction loads persisted fields and binds the listener; nothing runs
/// until [`DaemonHost::run`].
pub struct DaemonHost<D: Daemon> {
    daemon: Arc<D>,
    listener: Listener,
    scheduler: PersistenceScheduler,
    lifecycle: Lifecycle,
    context: Box<dyn ProcessContext>,
}

impl<D: Daemon> DaemonHost<D> {
    /// Host `daemon` with the configured persistence backend. The daemon's
    /// type name keys its persisted batch.
    pub async fn new(daemon: D, config: &AppConfig) -> Result<Self> {
        let store = open_store(config, daemon.type_name())?;
        Self::with_store(daemon, config, store).await
    }

    /// Host `daemon` with an already opened store
    pub async fn with_store(
        daemon: D,
        config: &AppConfig,
        store: Box<dyn PersistentStore>,
    ) -> Result<Self> {
        let scheduler = PersistenceScheduler::new(store, &config.persistence)?;
        scheduler.load_into(&daemon).await?;

        let listener = Listener::bind(&config.listener).await?;

        Ok(Self {
            daemon: Arc::new(daemon),
            listener,
            scheduler,
            lifecycle: Lifecycle::new(),
            context: Box::new(Foreground),
        })
    }

    /// Process context entered while the daemon runs
    pub fn with_context(mut self, context: Box<dyn ProcessContext>) -> Self {
        self.context = context;
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    /// Lifecycle handle, usable to stop the daemon from the hosting process
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle.clone()
    }

    pub fn daemon(&self) -> Arc<D> {
        self.daemon.clone()
    }

    /// Run until the daemon stops.
    ///
    /// The main loop runs on the current task. The listener and the scheduler
    /// run on their own tasks. A failed save stops the daemon and its error
    /// is returned here.
    pub async fn run(self) -> Result<()> {
        let Self {
            daemon,
            listener,
            scheduler,
            lifecycle,
            context,
        } = self;

        lifecycle.start()?;
        if let Err(e) = context.enter() {
            lifecycle.stop();
            return Err(e);
        }

        let mut resolver = Resolver::new(daemon.clone());
        for (name, target) in daemon.targets() {
            resolver.register(name, target);
        }
        let evaluator = Evaluator::new(resolver, lifecycle.clone());

        info!("Daemon {} started on {}", daemon.type_name(), listener.local_addr());

        let listener_task = tokio::spawn(listener.run(evaluator, lifecycle.clone()));
        let scheduler_task = {
            let daemon: Arc<dyn Daemon> = daemon.clone();
            let lifecycle = lifecycle.clone();
            tokio::spawn(async move {
                let result = scheduler.run(daemon, lifecycle.clone()).await;
                if result.is_err() {
                    lifecycle.stop();
                }
                result
            })
        };

        let main_result = daemon.run(lifecycle.clone()).await;
        if let Err(e) = &main_result {
            error!("Main loop of {} failed: {}", daemon.type_name(), e);
        }

        lifecycle.stop();
        context.leave();

        let scheduler_result = scheduler_task
            .await
            .map_err(|e| Error::Other(format!("persistence scheduler task failed: {}", e)))?;

        if listener_task.is_finished() {
            match listener_task.await {
                Ok(Err(e)) => error!("Listener failed: {}", e),
                Err(e) => error!("Listener task failed: {}", e),
                Ok(Ok(())) => {}
            }
        } else {
            debug!("Listener stays parked until its next request");
        }

        info!("Daemon {} stopped", daemon.type_name());
        main_result?;
        scheduler_result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use crate::daemon::testing::SimpleDaemon;
    use crate::daemon::Member;
    use crate::error::ErrorKind;
    use crate::ipc::Proxy;
    use crate::storage::MemoryStore;
    use serde_json::{json, Map};

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.listener.bind_address = "127.0.0.1".to_string();
        config.listener.port = Some(0);
        config.persistence.backend = "memory".to_string();
        config.persistence.save_interval_secs = 1;
        config.persistence.poll_interval_secs = 1;
        config
    }

    type RunTask = tokio::task::JoinHandle<Result<()>>;

    async fn hosted(store: MemoryStore) -> DaemonHost<SimpleDaemon> {
        DaemonHost::with_store(SimpleDaemon::new(), &test_config(), Box::new(store))
            .await
            .unwrap()
    }

    async fn idle_host() -> DaemonHost<SimpleDaemon> {
        hosted(MemoryStore::new()).await
    }

    async fn start(store: MemoryStore) -> (Proxy, Arc<SimpleDaemon>, RunTask) {
        let host = hosted(store).await;
        let daemon = host.daemon();
        let addr = host.local_addr().to_string();
        let task = tokio::spawn(host.run());
        let proxy = Proxy::connect("SimpleDaemon", addr).await.unwrap();
        (proxy, daemon, task)
    }

    async fn finish(task: RunTask) -> Result<()> {
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_read_and_write_attribute() {
        let (proxy, daemon, task) = start(MemoryStore::new()).await;

        assert_eq!(proxy.get_value::<i64>("constant").await.unwrap(), 5);
        proxy.set("constant", 10).await.unwrap();
        assert_eq!(proxy.get_value::<i64>("constant").await.unwrap(), 10);
        assert_eq!(daemon.constant(), 10);
        assert!(proxy.get_value::<bool>("running").await.unwrap());

        proxy.stop().await.unwrap();
        finish(task).await.unwrap();
    }

    #[tokio::test]
    async fn test_call_method_through_handle() {
        let (proxy, _, task) = start(MemoryStore::new()).await;

        let echo = proxy.get("echo").await.unwrap().into_handle().unwrap();
        let value = echo.invoke(vec![json!("hello")], Map::new(), None).await.unwrap();
        assert_eq!(value, json!("hello"));
        assert_eq!(proxy.call("echo", vec![json!("again")]).await.unwrap(), json!("again"));

        proxy.stop().await.unwrap();
        finish(task).await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let (proxy, _, task) = start(MemoryStore::new()).await;

        let err = proxy.call("unknown_method", vec![]).await.unwrap_err();
        assert_eq!(err.remote_kind(), Some(ErrorKind::AttributeNotFound));
        let err = proxy.get("unknown_attr").await.unwrap_err();
        assert_eq!(err.remote_kind(), Some(ErrorKind::AttributeNotFound));

        // The listener keeps serving after remote errors
        assert_eq!(proxy.get_value::<i64>("constant").await.unwrap(), 5);

        proxy.stop().await.unwrap();
        finish(task).await.unwrap();
    }

    #[tokio::test]
    async fn test_client_timeout_while_server_completes() {
        let (proxy, daemon, task) = start(MemoryStore::new()).await;

        let limit = Some(Duration::from_millis(100));
        let err = proxy
            .call_with("timeout", vec![json!(1.0)], Map::new(), limit)
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(!daemon.timeout_completed.load(Ordering::SeqCst));

        // Answered once the slow call has finished on the server
        assert_eq!(proxy.get_value::<i64>("constant").await.unwrap(), 5);
        assert!(daemon.timeout_completed.load(Ordering::SeqCst));

        proxy.stop().await.unwrap();
        finish(task).await.unwrap();
    }

    #[tokio::test]
    async fn test_panicking_method_fails_only_that_request() {
        let (proxy, daemon, task) = start(MemoryStore::new()).await;

        let err = proxy.call("explode", vec![json!(3)]).await.unwrap_err();
        assert_eq!(err.remote_kind(), Some(ErrorKind::Runtime));

        // Same connection, same listener
        assert_eq!(proxy.get_value::<i64>("constant").await.unwrap(), 5);
        assert!(daemon.loop_iterations.load(Ordering::SeqCst) > 0);

        proxy.stop().await.unwrap();
        finish(task).await.unwrap();
    }

    #[tokio::test]
    async fn test_registered_target() {
        let (proxy, daemon, task) = start(MemoryStore::new()).await;

        let counter = proxy.handle("counter");
        counter.set("count", 3).await.unwrap();
        assert_eq!(counter.get_value::<i64>("count").await.unwrap(), 3);
        assert_eq!(daemon.counter.get("count").unwrap(), Member::Value(json!(3)));

        let err = proxy.handle("nowhere").get("count").await.unwrap_err();
        assert_eq!(err.remote_kind(), Some(ErrorKind::AttributeNotFound));

        proxy.stop().await.unwrap();
        finish(task).await.unwrap();
    }

    #[tokio::test]
    async fn test_persisted_fields_load_and_save() {
        let store = MemoryStore::with_fields(vec![("pst_list".to_string(), json!([1]))]);
        let (proxy, daemon, task) = start(store.clone()).await;

        assert_eq!(daemon.pst_list(), Some(vec![1]));
        assert_eq!(proxy.get_value::<Vec<i64>>("pst_list").await.unwrap(), vec![1]);

        proxy.call("update_pst_list", vec![json!([1, 2, 3])]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;

        assert_eq!(
            store.load().await.unwrap(),
            vec![("pst_list".to_string(), json!([1, 2, 3]))]
        );

        proxy.stop().await.unwrap();
        finish(task).await.unwrap();
    }

    #[tokio::test]
    async fn test_remote_stop_ends_everything() {
        let (proxy, daemon, task) = start(MemoryStore::new()).await;

        proxy.stop().await.unwrap();
        finish(task).await.unwrap();
        assert!(daemon.main_loop_exited.load(Ordering::SeqCst));

        // Listener is gone with the host
        assert!(proxy.get("constant").await.is_err());
    }

    #[tokio::test]
    async fn test_local_stop_leaves_listener_parked() {
        let host = idle_host().await;
        let lifecycle = host.lifecycle();
        let daemon = host.daemon();
        let task = tokio::spawn(host.run());

        tokio::time::sleep(Duration::from_millis(100)).await;
        lifecycle.stop();
        finish(task).await.unwrap();
        assert!(daemon.main_loop_exited.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_run_after_stop_is_lifecycle_error() {
        let host = idle_host().await;
        host.lifecycle().stop();
        assert!(matches!(host.run().await, Err(Error::Lifecycle(_))));
    }

    #[tokio::test]
    async fn test_unknown_backend_fails_construction() {
        let mut config = test_config();
        config.persistence.backend = "redis".to_string();
        let err = DaemonHost::new(SimpleDaemon::new(), &config).await.err().unwrap();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_zero_poll_interval_fails_construction() {
        let mut config = test_config();
        config.persistence.poll_interval_secs = 0;
        let err = DaemonHost::new(SimpleDaemon::new(), &config).await.err().unwrap();
        assert!(matches!(err, Error::Config(_)));
    }

    #[derive(Default)]
    struct RecordingContext {
        entered: Arc<AtomicBool>,
        left: Arc<AtomicBool>,
    }

    impl ProcessContext for RecordingContext {
        fn enter(&self) -> Result<()> {
            self.entered.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn leave(&self) {
            self.left.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_process_context_entered_and_left() {
        let context = RecordingContext::default();
        let entered = context.entered.clone();
        let left = context.left.clone();

        let host = idle_host().await.with_context(Box::new(context));
        let lifecycle = host.lifecycle();
        let task = tokio::spawn(host.run());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(entered.load(Ordering::SeqCst));
        assert!(!left.load(Ordering::SeqCst));

        lifecycle.stop();
        finish(task).await.unwrap();
        assert!(left.load(Ordering::SeqCst));
    }
}
