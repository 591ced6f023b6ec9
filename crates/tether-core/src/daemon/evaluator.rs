//! Server-side evaluation of protocol requests

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use super::{Lifecycle, Member, MemberResult, RemoteObject};
use crate::error::RemoteError;
use crate::ipc::{Outcome, Reply, Request, ROOT_TARGET};

/// Built-in root method that stops the daemon
pub const STOP_METHOD: &str = "stop";
/// Built-in read-only root attribute reporting the running state
pub const RUNNING_ATTR: &str = "running";

/// Maps target references to the objects requests are evaluated against.
/// Always contains the root daemon under [`ROOT_TARGET`].
pub struct Resolver {
    root: Arc<dyn RemoteObject>,
    targets: HashMap<String, Arc<dyn RemoteObject>>,
}

impl Resolver {
    pub fn new(root: Arc<dyn RemoteObject>) -> Self {
        Self {
            root,
            targets: HashMap::new(),
        }
    }

    /// Make `target` reachable under `name`. The root cannot be replaced.
    pub fn register(&mut self, name: impl Into<String>, target: Arc<dyn RemoteObject>) {
        let name = name.into();
        if name == ROOT_TARGET {
            warn!("Ignoring attempt to replace the root target");
            return;
        }
        self.targets.insert(name, target);
    }

    pub fn resolve(&self, name: &str) -> MemberResult<&Arc<dyn RemoteObject>> {
        if name == ROOT_TARGET {
            return Ok(&self.root);
        }
        self.targets.get(name).ok_or_else(|| {
            RemoteError::attribute_not_found(self.root.type_name(), name)
                .with_detail(serde_json::json!({ "target": name }))
        })
    }

    pub fn root(&self) -> &Arc<dyn RemoteObject> {
        &self.root
    }
}

/// Executes requests against a live daemon. Failures become error replies.
pub struct Evaluator {
    resolver: Resolver,
    lifecycle: Lifecycle,
}

impl Evaluator {
    pub fn new(resolver: Resolver, lifecycle: Lifecycle) -> Self {
        Self {
            resolver,
            lifecycle,
        }
    }

    pub async fn evaluate(&self, request: Request) -> Reply {
        let id = request.id;
        let operation = request.operation.clone();

        let result = if request.is_read() {
            self.read(&request)
        } else if request.is_write() {
            self.write(request)
        } else {
            self.invoke(request).await
        };

        match result {
            Ok(outcome) => Reply::new(id, outcome),
            Err(e) => {
                debug!("Request {} ({}) failed: {}", id, operation, e);
                Reply::error(id, e)
            }
        }
    }

    fn read(&self, request: &Request) -> MemberResult<Outcome> {
        let attribute = attribute_of(request)?;

        if request.target == ROOT_TARGET {
            match attribute {
                STOP_METHOD => return Ok(Outcome::MethodHandle(STOP_METHOD.to_string())),
                RUNNING_ATTR => {
                    return Ok(Outcome::ReadResult(Value::Bool(self.lifecycle.is_running())))
                }
                _ => {}
            }
        }

        let target = self.resolver.resolve(&request.target)?;
        match target.get(attribute)? {
            Member::Value(value) => Ok(Outcome::ReadResult(value)),
            Member::Method => Ok(Outcome::MethodHandle(attribute.to_string())),
        }
    }

    fn write(&self, request: Request) -> MemberResult<Outcome> {
        let attribute = attribute_of(&request)?.to_string();

        let builtin = matches!(attribute.as_str(), STOP_METHOD | RUNNING_ATTR);
        if request.target == ROOT_TARGET && builtin {
            return Err(RemoteError::read_only(&attribute));
        }

        let target = self.resolver.resolve(&request.target)?;
        let value = request.args.into_iter().next().ok_or_else(|| {
            RemoteError::invalid_arguments(format!("no value given for '{}'", attribute))
        })?;
        target.set(&attribute, value)?;
        Ok(Outcome::WriteResult)
    }

    async fn invoke(&self, request: Request) -> MemberResult<Outcome> {
        match request.operation.as_str() {
            STOP_METHOD => {
                self.lifecycle.stop();
                return Ok(Outcome::InvokeResult(Value::Null));
            }
            RUNNING_ATTR => return Err(RemoteError::not_callable(RUNNING_ATTR)),
            _ => {}
        }

        let value = self
            .resolver
            .root()
            .invoke(&request.operation, request.args, request.kwargs)
            .await?;
        Ok(Outcome::InvokeResult(value))
    }
}

fn attribute_of(request: &Request) -> MemberResult<&str> {
    request.attribute.as_deref().ok_or_else(|| {
        RemoteError::invalid_arguments(format!("{} requires an attribute name", request.operation))
    })
}
