//! Listener for daemon requests
//!
//! Binds a TCP endpoint and answers requests one at a time through the
//! [`Evaluator`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::protocol::{Reply, Request};
use super::transport::ReplySocket;
use crate::config::ListenerConfig;
use crate::daemon::{Evaluator, Lifecycle};
use crate::error::{ErrorKind, RemoteError};
use crate::{Error, Result};

/// Bound listener, ready to serve requests
pub struct Listener {
    socket: ReplySocket,
    recv_timeout: Option<Duration>,
}

impl Listener {
    /// Bind to the configured port, or the first free port of the range
    pub async fn bind(config: &ListenerConfig) -> Result<Self> {
        let listener = match config.port {
            Some(port) => TcpListener::bind((config.bind_address.as_str(), port)).await?,
            None => {
                scan_ports(
                    &config.bind_address,
                    config.port_range_start,
                    config.port_range_end,
                )
                .await?
            }
        };

        let socket = ReplySocket::new(listener)?;
        info!("Listener bound to {}", socket.local_addr());
        Ok(Self {
            socket,
            recv_timeout: config.recv_timeout(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr()
    }

    /// Serve requests while the daemon is running.
    ///
    /// The running state is checked between requests only. Without a receive
    /// timeout, a daemon stopped from elsewhere keeps this loop parked until
    /// one more request arrives.
    pub async fn run(mut self, evaluator: Evaluator, lifecycle: Lifecycle) -> Result<()> {
        let evaluator = Arc::new(evaluator);
        info!("Listening for requests on {}", self.local_addr());

        while lifecycle.is_running() {
            let incoming = match self.socket.recv(self.recv_timeout).await {
                Ok(incoming) => incoming,
                Err(Error::Timeout(_)) => continue,
                Err(e) => return Err(e),
            };

            let reply = match Request::deserialize(&incoming.payload) {
                Ok(request) => {
                    debug!("Received request: {} (id: {})", request.operation, request.id);
                    evaluate_isolated(&evaluator, request).await
                }
                Err(e) => {
                    warn!("Failed to parse request from {}: {}", incoming.peer, e);
                    Reply::error(Uuid::nil(), RemoteError::new(ErrorKind::Protocol, e.to_string()))
                }
            };

            incoming.reply(encode_reply(&reply));
        }

        info!("Listener stopped");
        Ok(())
    }
}

/// Evaluate on its own task so a panicking daemon member fails this request
/// only. The listener still waits for it, keeping requests sequential.
async fn evaluate_isolated(evaluator: &Arc<Evaluator>, request: Request) -> Reply {
    let id = request.id;
    let operation = request.operation.clone();
    let evaluator = evaluator.clone();

    match tokio::spawn(async move { evaluator.evaluate(request).await }).await {
        Ok(reply) => reply,
        Err(e) => {
            error!("Request {} ({}) panicked: {}", id, operation, e);
            Reply::error(
                id,
                RemoteError::runtime(format!("'{}' panicked on the daemon", operation)),
            )
        }
    }
}

/// Bind the first free port in `[start, end)`
async fn scan_ports(bind_address: &str, start: u16, end: u16) -> Result<TcpListener> {
    for port in start..end {
        match TcpListener::bind((bind_address, port)).await {
            Ok(listener) => return Ok(listener),
            Err(e) => debug!("Port {} unavailable: {}", port, e),
        }
    }

    Err(Error::Config(format!(
        "could not find a free port in range {}..{} on {}",
        start, end, bind_address
    )))
}

/// Every request gets exactly one reply, an empty payload as a last resort
fn encode_reply(reply: &Reply) -> Vec<u8> {
    match reply.serialize() {
        Ok(payload) => payload,
        Err(e) => {
            warn!("Failed to encode reply {}: {}", reply.id, e);
            Reply::error(reply.id, RemoteError::new(ErrorKind::Protocol, e.to_string()))
                .serialize()
                .unwrap_or_default()
        }
    }
}
