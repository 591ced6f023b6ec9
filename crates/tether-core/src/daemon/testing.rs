//! Daemons used by tests across the crate

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{decode, Args, Daemon, Lifecycle, Member, MemberResult, RemoteObject};
use crate::error::RemoteError;

/// Daemon with a constant, a persisted list and a few methods
pub struct SimpleDaemon {
    constant: AtomicI64,
    pst_list: Mutex<Option<Vec<i64>>>,
    loop_interval: Duration,
    pub loop_iterations: AtomicUsize,
    pub main_loop_exited: AtomicBool,
    pub timeout_completed: AtomicBool,
    pub counter: Arc<Counter>,
}

impl SimpleDaemon {
    pub fn new() -> Self {
        Self::with_loop_interval(Duration::from_millis(50))
    }

    pub fn with_loop_interval(loop_interval: Duration) -> Self {
        Self {
            constant: AtomicI64::new(5),
            pst_list: Mutex::new(None),
            loop_interval,
            loop_iterations: AtomicUsize::new(0),
            main_loop_exited: AtomicBool::new(false),
            timeout_completed: AtomicBool::new(false),
            counter: Arc::new(Counter::default()),
        }
    }

    pub fn constant(&self) -> i64 {
        self.constant.load(Ordering::SeqCst)
    }

    pub fn pst_list(&self) -> Option<Vec<i64>> {
        self.pst_list.lock().unwrap().clone()
    }

    pub fn set_pst_list(&self, list: Vec<i64>) {
        *self.pst_list.lock().unwrap() = Some(list);
    }
}

#[async_trait]
impl RemoteObject for SimpleDaemon {
    fn type_name(&self) -> &str {
        "SimpleDaemon"
    }

    fn get(&self, name: &str) -> MemberResult<Member> {
        match name {
            "constant" => Member::value(self.constant()),
            "pst_list" => Member::value(self.pst_list()),
            "echo" | "timeout" | "update_pst_list" | "explode" => Ok(Member::Method),
            _ => Err(RemoteError::attribute_not_found(self.type_name(), name)),
        }
    }

    fn set(&self, name: &str, value: Value) -> MemberResult<()> {
        match name {
            "constant" => self.constant.store(decode(name, value)?, Ordering::SeqCst),
            "pst_list" => *self.pst_list.lock().unwrap() = decode(name, value)?,
            _ => return Err(RemoteError::attribute_not_found(self.type_name(), name)),
        }
        Ok(())
    }

    async fn invoke(
        &self,
        name: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> MemberResult<Value> {
        let args = Args::new(name, args, kwargs);
        match name {
            "echo" => {
                args.at_most(1)?;
                let text: Value = args.required(0, "text")?;
                Ok(text)
            }
            "timeout" => {
                let secs: f64 = args.optional(0, "t")?.unwrap_or(10.0);
                tokio::time::sleep(Duration::from_secs_f64(secs)).await;
                self.timeout_completed.store(true, Ordering::SeqCst);
                Ok(Value::Null)
            }
            "update_pst_list" => {
                let list: Vec<i64> = args.required(0, "new_list")?;
                self.set_pst_list(list);
                Ok(Value::Null)
            }
            "explode" => {
                let empty: Vec<i64> = Vec::new();
                Ok(Value::from(empty[args.required::<usize>(0, "index")?]))
            }
            "constant" => Err(RemoteError::not_callable(name)),
            _ => Err(RemoteError::attribute_not_found(self.type_name(), name)),
        }
    }
}

#[async_trait]
impl Daemon for SimpleDaemon {
    fn persisted_fields(&self) -> Vec<String> {
        vec!["pst_list".to_string()]
    }

    fn targets(&self) -> std::collections::HashMap<String, Arc<dyn RemoteObject>> {
        let mut targets: std::collections::HashMap<String, Arc<dyn RemoteObject>> =
            std::collections::HashMap::new();
        targets.insert("counter".to_string(), self.counter.clone());
        targets
    }

    async fn run(&self, lifecycle: Lifecycle) -> crate::Result<()> {
        while lifecycle.is_running() {
            self.loop_iterations.fetch_add(1, Ordering::SeqCst);
            lifecycle.sleep(self.loop_interval).await;
        }
        self.main_loop_exited.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Secondary target with a single counter attribute
#[derive(Default)]
pub struct Counter {
    count: AtomicI64,
}

#[async_trait]
impl RemoteObject for Counter {
    fn type_name(&self) -> &str {
        "Counter"
    }

    fn get(&self, name: &str) -> MemberResult<Member> {
        match name {
            "count" => Member::value(self.count.load(Ordering::SeqCst)),
            _ => Err(RemoteError::attribute_not_found(self.type_name(), name)),
        }
    }

    fn set(&self, name: &str, value: Value) -> MemberResult<()> {
        match name {
            "count" => {
                self.count.store(decode(name, value)?, Ordering::SeqCst);
                Ok(())
            }
            _ => Err(RemoteError::attribute_not_found(self.type_name(), name)),
        }
    }

    async fn invoke(
        &self,
        name: &str,
        _args: Vec<Value>,
        _kwargs: Map<String, Value>,
    ) -> MemberResult<Value> {
        Err(RemoteError::attribute_not_found(self.type_name(), name))
    }
}
