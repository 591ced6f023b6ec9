use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Timed out after {0:?} waiting for reply")]
    Timeout(Duration),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// The remote error kind, if this error was raised by the daemon
    pub fn remote_kind(&self) -> Option<ErrorKind> {
        match self {
            Error::Remote(e) => Some(e.kind),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }
}

/// Category of a failure raised while evaluating a request on the daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AttributeNotFound,
    NotCallable,
    ReadOnly,
    InvalidArguments,
    InvalidValue,
    Protocol,
    Runtime,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::AttributeNotFound => "AttributeNotFound",
            ErrorKind::NotCallable => "NotCallable",
            ErrorKind::ReadOnly => "ReadOnly",
            ErrorKind::InvalidArguments => "InvalidArguments",
            ErrorKind::InvalidValue => "InvalidValue",
            ErrorKind::Protocol => "Protocol",
            ErrorKind::Runtime => "Runtime",
        };
        f.write_str(name)
    }
}

/// Error envelope carried inside an error reply.
///
/// Daemon code returns these from its `RemoteObject` methods; the client gets
/// the same kind, message and detail back as `Error::Remote`.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct RemoteError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

impl RemoteError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }

    pub fn attribute_not_found(owner: &str, name: &str) -> Self {
        Self::new(
            ErrorKind::AttributeNotFound,
            format!("'{}' object has no attribute '{}'", owner, name),
        )
    }

    pub fn not_callable(name: &str) -> Self {
        Self::new(ErrorKind::NotCallable, format!("'{}' is not callable", name))
    }

    pub fn read_only(name: &str) -> Self {
        Self::new(ErrorKind::ReadOnly, format!("attribute '{}' is read-only", name))
    }

    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArguments, message)
    }

    pub fn invalid_value(name: &str, err: impl fmt::Display) -> Self {
        Self::new(
            ErrorKind::InvalidValue,
            format!("invalid value for '{}': {}", name, err),
        )
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Runtime, message)
    }
}
