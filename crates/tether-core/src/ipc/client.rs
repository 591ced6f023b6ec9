//! Client proxy for a remote daemon
//!
//! A [`Proxy`] stands in for the daemon itself or for one of its members.
//! Reads, writes and calls become protocol requests; errors raised on the
//! daemon come back as [`Error::Remote`] with the original kind and message.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use super::protocol::*;
use super::transport::RequestSocket;
use crate::daemon::STOP_METHOD;
use crate::{Error, Result};

/// Result of reading an attribute through a proxy
#[derive(Debug, Clone)]
pub enum Remote {
    Value(Value),
    /// The attribute is a method; invoke it through this handle
    Handle(Proxy),
}

impl Remote {
    pub fn into_value(self) -> Option<Value> {
        match self {
            Remote::Value(value) => Some(value),
            Remote::Handle(_) => None,
        }
    }

    pub fn into_handle(self) -> Option<Proxy> {
        match self {
            Remote::Value(_) => None,
            Remote::Handle(proxy) => Some(proxy),
        }
    }

    pub fn is_handle(&self) -> bool {
        matches!(self, Remote::Handle(_))
    }
}

/// Handle to a remote daemon or one of its members.
///
/// Handles never change after construction. Handles derived from one another
/// share the connection, so their requests are sent one at a time.
#[derive(Clone)]
pub struct Proxy {
    name: String,
    socket: Arc<RequestSocket>,
    target: String,
}

impl Proxy {
    /// Connect to the daemon called `name` listening on `address` (host:port)
    pub async fn connect(name: impl Into<String>, address: impl Into<String>) -> Result<Self> {
        Self::connect_with_timeout(name, address, None).await
    }

    /// Like [`Proxy::connect`], with a timeout applied to every request
    pub async fn connect_with_timeout(
        name: impl Into<String>,
        address: impl Into<String>,
        default_timeout: Option<Duration>,
    ) -> Result<Self> {
        let socket = RequestSocket::connect(address, default_timeout).await?;
        Ok(Self {
            name: name.into(),
            socket: Arc::new(socket),
            target: ROOT_TARGET.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &str {
        self.socket.address()
    }

    /// Attribute this handle stands for, [`ROOT_TARGET`] for the daemon itself
    pub fn target_attribute(&self) -> &str {
        &self.target
    }

    pub fn is_root(&self) -> bool {
        self.target == ROOT_TARGET
    }

    /// Handle for a target the daemon registered under `target`
    pub fn handle(&self, target: impl Into<String>) -> Proxy {
        Proxy {
            name: self.name.clone(),
            socket: self.socket.clone(),
            target: target.into(),
        }
    }

    /// Read attribute `name`. Methods come back as a new handle.
    pub async fn get(&self, name: &str) -> Result<Remote> {
        let request = Request::read(self.target.as_str(), name);
        match self.remote_eval(request, None).await? {
            Outcome::MethodHandle(_) => Ok(Remote::Handle(self.handle(name))),
            Outcome::ReadResult(value) | Outcome::InvokeResult(value) => Ok(Remote::Value(value)),
            Outcome::Unknown | Outcome::WriteResult => Ok(Remote::Value(Value::Null)),
            Outcome::Error(e) => Err(Error::Remote(e)),
        }
    }

    /// Read attribute `name` and decode it
    pub async fn get_value<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        match self.get(name).await? {
            Remote::Value(value) => Ok(serde_json::from_value(value)?),
            Remote::Handle(_) => Err(Error::Other(format!(
                "'{}' is a method, not a value",
                name
            ))),
        }
    }

    /// Set attribute `name` to `value`
    pub async fn set(&self, name: &str, value: impl Serialize) -> Result<()> {
        let value = serde_json::to_value(value)?;
        let request = Request::write(self.target.as_str(), name, value);
        self.remote_eval(request, None).await?;
        Ok(())
    }

    /// Call the method this handle stands for.
    ///
    /// `timeout` bounds the wait for the reply only; the daemon still runs
    /// the call to completion.
    pub async fn invoke(
        &self,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let request = Request::invoke(self.target.as_str(), args, kwargs);
        self.invoke_request(request, timeout).await
    }

    /// Call daemon method `method` without fetching a handle first
    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        self.call_with(method, args, Map::new(), None).await
    }

    pub async fn call_with(
        &self,
        method: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        self.invoke_request(Request::invoke(method, args, kwargs), timeout)
            .await
    }

    /// Ask the daemon to stop
    pub async fn stop(&self) -> Result<()> {
        self.call(STOP_METHOD, Vec::new()).await?;
        Ok(())
    }

    async fn invoke_request(&self, request: Request, timeout: Option<Duration>) -> Result<Value> {
        match self.remote_eval(request, timeout).await? {
            Outcome::ReadResult(value) | Outcome::InvokeResult(value) => Ok(value),
            Outcome::MethodHandle(name) => Ok(Value::String(name)),
            Outcome::Unknown | Outcome::WriteResult => Ok(Value::Null),
            Outcome::Error(e) => Err(Error::Remote(e)),
        }
    }

    /// Send `request` and return the outcome, raising remote errors locally
    async fn remote_eval(&self, request: Request, timeout: Option<Duration>) -> Result<Outcome> {
        let payload = request.serialize()?;
        let reply = self.socket.request_reply(&payload, timeout).await?;
        let reply = Reply::deserialize(&reply)?;

        if reply.id != request.id {
            return Err(Error::Protocol(format!(
                "reply {} does not answer request {}",
                reply.id, request.id
            )));
        }

        match reply.outcome {
            Outcome::Error(e) => Err(Error::Remote(e)),
            outcome => Ok(outcome),
        }
    }
}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            write!(f, "Proxy for {}:{}", self.name, self.address())
        } else {
            write!(f, "Proxy for {}.{} at {}", self.name, self.target, self.address())
        }
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("name", &self.name)
            .field("address", &self.address())
            .field("target", &self.target)
            .finish()
    }
}
