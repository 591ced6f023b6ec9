pub mod config;
pub mod daemon;
pub mod error;
pub mod ipc;
pub mod scheduler;
pub mod storage;

pub use config::AppConfig;
pub use daemon::{Daemon, DaemonHost, Lifecycle, Member, MemberResult, RemoteObject};
pub use error::{Error, ErrorKind, RemoteError, Result};
pub use ipc::{Proxy, Remote};
