//! Remote object protocol
//!
//! A request names an operation: the reserved `getattr` and `setattr` tokens
//! read or write an attribute, any other name invokes the method of that name
//! on the daemon. Messages are compact JSON, one message per line on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::RemoteError;
use crate::{Error, Result};

/// Operation token for reading an attribute
pub const READ_OP: &str = "getattr";
/// Operation token for writing an attribute
pub const WRITE_OP: &str = "setattr";
/// Target reference for the daemon itself
pub const ROOT_TARGET: &str = "self";

/// Request to evaluate an operation on a daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: Uuid,
    pub operation: String,
    /// Base reference the attribute is looked up on
    #[serde(default = "root_target")]
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

fn root_target() -> String {
    ROOT_TARGET.to_string()
}

impl Request {
    fn new(operation: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            operation: operation.into(),
            target: target.into(),
            attribute: None,
            args: Vec::new(),
            kwargs: Map::new(),
            timestamp: Utc::now(),
        }
    }

    /// Read `attribute` on `target`
    pub fn read(target: impl Into<String>, attribute: impl Into<String>) -> Self {
        let mut req = Self::new(READ_OP, target);
        req.attribute = Some(attribute.into());
        req
    }

    /// Set `attribute` on `target` to `value`
    pub fn write(target: impl Into<String>, attribute: impl Into<String>, value: Value) -> Self {
        let mut req = Self::new(WRITE_OP, target);
        req.attribute = Some(attribute.into());
        req.args = vec![value];
        req
    }

    /// Invoke `method` on the daemon
    pub fn invoke(
        method: impl Into<String>,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Self {
        let mut req = Self::new(method, ROOT_TARGET);
        req.args = args;
        req.kwargs = kwargs;
        req
    }

    pub fn is_read(&self) -> bool {
        self.operation == READ_OP
    }

    pub fn is_write(&self) -> bool {
        self.operation == WRITE_OP
    }

    pub fn is_invoke(&self) -> bool {
        !self.is_read() && !self.is_write()
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn deserialize(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload)
            .map_err(|e| Error::Protocol(format!("malformed request: {}", e)))
    }
}

/// Tag describing how the client should unwrap a reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    Unknown,
    ReadResult,
    WriteResult,
    InvokeResult,
    MethodHandle,
    Error,
}

/// Outcome of an evaluation. Each kind carries exactly the payload it needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum Outcome {
    Unknown,
    ReadResult(Value),
    WriteResult,
    InvokeResult(Value),
    /// Name of a callable member, to be wrapped in a new proxy handle
    MethodHandle(String),
    Error(RemoteError),
}

/// Reply to a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    /// Id of the request this answers, nil if the request could not be parsed
    pub id: Uuid,
    pub outcome: Outcome,
    pub timestamp: DateTime<Utc>,
}

impl Reply {
    pub fn new(id: Uuid, outcome: Outcome) -> Self {
        Self {
            id,
            outcome,
            timestamp: Utc::now(),
        }
    }

    pub fn error(id: Uuid, error: RemoteError) -> Self {
        Self::new(id, Outcome::Error(error))
    }

    pub fn kind(&self) -> ResultKind {
        match self.outcome {
            Outcome::Unknown => ResultKind::Unknown,
            Outcome::ReadResult(_) => ResultKind::ReadResult,
            Outcome::WriteResult => ResultKind::WriteResult,
            Outcome::InvokeResult(_) => ResultKind::InvokeResult,
            Outcome::MethodHandle(_) => ResultKind::MethodHandle,
            Outcome::Error(_) => ResultKind::Error,
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self.outcome, Outcome::Error(_))
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn deserialize(payload: &[u8]) -> Result<Self> {
        if payload.is_empty() {
            return Err(Error::Protocol("empty reply".to_string()));
        }
        serde_json::from_slice(payload)
            .map_err(|e| Error::Protocol(format!("malformed reply: {}", e)))
    }
}
