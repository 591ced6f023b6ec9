//! Daemon side of the remote object model
//!
//! A daemon exposes itself through [`RemoteObject`]: attribute reads and
//! writes plus method invocation by name. The framework does not lock daemon
//! state; every method takes `&self`, so implementations pick their own
//! interior mutability for anything shared with their main loop.

mod evaluator;
mod host;
mod lifecycle;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::RemoteError;

pub use evaluator::{Evaluator, Resolver, RUNNING_ATTR, STOP_METHOD};
pub use host::DaemonHost;
pub use lifecycle::{Foreground, Lifecycle, LifecycleState, ProcessContext};

/// Result type for daemon member access
pub type MemberResult<T> = std::result::Result<T, RemoteError>;

/// What a member name refers to
#[derive(Debug, Clone, PartialEq)]
pub enum Member {
    Value(Value),
    /// A callable member; reading it yields a method handle
    Method,
}

impl Member {
    pub fn value(value: impl serde::Serialize) -> MemberResult<Self> {
        serde_json::to_value(value)
            .map(Member::Value)
            .map_err(|e| RemoteError::runtime(format!("failed to encode value: {}", e)))
    }
}

/// Object whose members can be reached through the remote protocol
#[async_trait]
pub trait RemoteObject: Send + Sync {
    /// Name used in error messages
    fn type_name(&self) -> &str;

    fn get(&self, name: &str) -> MemberResult<Member>;

    fn set(&self, name: &str, value: Value) -> MemberResult<()>;

    async fn invoke(
        &self,
        name: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> MemberResult<Value>;
}

/// A long-running process exposed as a remote object
#[async_trait]
pub trait Daemon: RemoteObject + 'static {
    /// Fields saved by the persistence scheduler, read with `get` and
    /// restored with `set`
    fn persisted_fields(&self) -> Vec<String> {
        Vec::new()
    }

    /// Extra named targets, reachable by proxies whose target is the name
    fn targets(&self) -> HashMap<String, Arc<dyn RemoteObject>> {
        HashMap::new()
    }

    /// Main work loop. Should return soon after `lifecycle` stops running.
    async fn run(&self, lifecycle: Lifecycle) -> crate::Result<()>;
}

/// Positional and named arguments of an invocation
pub struct Args {
    method: String,
    args: Vec<Value>,
    kwargs: Map<String, Value>,
}

impl Args {
    pub fn new(method: &str, args: Vec<Value>, kwargs: Map<String, Value>) -> Self {
        Self {
            method: method.to_string(),
            args,
            kwargs,
        }
    }

    /// Required argument, by position or by name
    pub fn required<T: DeserializeOwned>(&self, index: usize, name: &str) -> MemberResult<T> {
        self.optional(index, name)?.ok_or_else(|| {
            RemoteError::invalid_arguments(format!(
                "{}() missing required argument: '{}'",
                self.method, name
            ))
        })
    }

    pub fn optional<T: DeserializeOwned>(
        &self,
        index: usize,
        name: &str,
    ) -> MemberResult<Option<T>> {
        let value = match (self.args.get(index), self.kwargs.get(name)) {
            (Some(_), Some(_)) => {
                return Err(RemoteError::invalid_arguments(format!(
                    "{}() got multiple values for argument '{}'",
                    self.method, name
                )))
            }
            (Some(v), None) | (None, Some(v)) => v.clone(),
            (None, None) => return Ok(None),
        };
        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| RemoteError::invalid_value(name, e))
    }

    /// Reject positional arguments beyond `max`
    pub fn at_most(&self, max: usize) -> MemberResult<()> {
        if self.args.len() > max {
            return Err(RemoteError::invalid_arguments(format!(
                "{}() takes {} positional arguments but {} were given",
                self.method,
                max,
                self.args.len()
            )));
        }
        Ok(())
    }
}

/// Decode a value written to attribute `name`
pub fn decode<T: DeserializeOwned>(name: &str, value: Value) -> MemberResult<T> {
    serde_json::from_value(value).map_err(|e| RemoteError::invalid_value(name, e))
}

#[cfg(test)]
pub(crate) mod testing;
