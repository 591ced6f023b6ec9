//! Request/reply transport over TCP
//!
//! Each message is one line. A [`RequestSocket`] has at most one exchange in
//! flight; a [`ReplySocket`] hands requests from all connected clients to a
//! single consumer, which must answer each one before the client that sent it
//! can send another.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, warn};

use crate::{Error, Result};

/// Requests waiting for the listener loop
const INCOMING_QUEUE: usize = 64;

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Connection {
    async fn open(address: &str) -> Result<Self> {
        let stream = TcpStream::connect(address).await.map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("failed to connect to daemon at {}: {}", address, e),
            ))
        })?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
        })
    }

    async fn exchange(&mut self, payload: &[u8]) -> Result<Vec<u8>> {
        write_frame(&mut self.writer, payload).await?;
        match read_frame(&mut self.reader).await? {
            Some(reply) => Ok(reply),
            None => Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "daemon closed the connection",
            ))),
        }
    }
}

async fn write_frame(writer: &mut OwnedWriteHalf, payload: &[u8]) -> Result<()> {
    writer.write_all(payload).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

/// Read one line, without its terminator. `None` when the peer closed.
async fn read_frame(reader: &mut BufReader<OwnedReadHalf>) -> Result<Option<Vec<u8>>> {
    let mut line = Vec::new();
    let bytes_read = reader.read_until(b'\n', &mut line).await?;
    if bytes_read == 0 {
        return Ok(None);
    }
    if line.last() == Some(&b'\n') {
        line.pop();
    }
    Ok(Some(line))
}

/// Client side of the channel
pub struct RequestSocket {
    address: String,
    default_timeout: Option<Duration>,
    conn: Mutex<Option<Connection>>,
}

impl RequestSocket {
    /// Connect to a daemon listening on `address` (host:port)
    pub async fn connect(
        address: impl Into<String>,
        default_timeout: Option<Duration>,
    ) -> Result<Self> {
        let address = address.into();
        let conn = Connection::open(&address).await?;
        Ok(Self {
            address,
            default_timeout,
            conn: Mutex::new(Some(conn)),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Send one request and wait for its reply.
    ///
    /// `timeout` overrides the socket default. When it expires the connection
    /// is dropped, so a late reply is never read; the next call reconnects.
    pub async fn request_reply(
        &self,
        payload: &[u8],
        timeout: Option<Duration>,
    ) -> Result<Vec<u8>> {
        let timeout = timeout.or(self.default_timeout);
        let mut slot = self.conn.lock().await;
        let pending = slot.take();
        let address = self.address.as_str();

        let exchange = async move {
            let mut conn = match pending {
                Some(conn) => conn,
                None => {
                    debug!("Reconnecting to {}", address);
                    Connection::open(address).await?
                }
            };
            let reply = conn.exchange(payload).await?;
            Ok::<_, Error>((conn, reply))
        };

        let (conn, reply) = match timeout {
            Some(limit) => tokio::time::timeout(limit, exchange)
                .await
                .map_err(|_| Error::Timeout(limit))??,
            None => exchange.await?,
        };

        *slot = Some(conn);
        Ok(reply)
    }
}

/// A request received by a [`ReplySocket`], answered with [`Incoming::reply`]
#[derive(Debug)]
pub struct Incoming {
    pub payload: Vec<u8>,
    pub peer: SocketAddr,
    reply_tx: oneshot::Sender<Vec<u8>>,
}

impl Incoming {
    pub fn reply(self, payload: Vec<u8>) {
        if self.reply_tx.send(payload).is_err() {
            debug!("Client {} went away before its reply was sent", self.peer);
        }
    }
}

/// Server side of the channel
pub struct ReplySocket {
    local_addr: SocketAddr,
    incoming: mpsc::Receiver<Incoming>,
    acceptor: JoinHandle<()>,
}

impl ReplySocket {
    /// Start accepting connections on a bound listener
    pub fn new(listener: TcpListener) -> Result<Self> {
        let local_addr = listener.local_addr()?;
        let (tx, rx) = mpsc::channel(INCOMING_QUEUE);
        let acceptor = tokio::spawn(accept_loop(listener, tx));
        Ok(Self {
            local_addr,
            incoming: rx,
            acceptor,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the next request. `None` timeout blocks until one arrives.
    pub async fn recv(&mut self, timeout: Option<Duration>) -> Result<Incoming> {
        let next = match timeout {
            Some(limit) => tokio::time::timeout(limit, self.incoming.recv())
                .await
                .map_err(|_| Error::Timeout(limit))?,
            None => self.incoming.recv().await,
        };
        next.ok_or_else(|| Error::Other("reply socket acceptor stopped".to_string()))
    }
}

impl Drop for ReplySocket {
    fn drop(&mut self) {
        self.acceptor.abort();
    }
}

async fn accept_loop(listener: TcpListener, tx: mpsc::Sender<Incoming>) {
    // Dropped with the acceptor, which aborts every connection task
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        debug!("Accepted connection from {}", peer);
                        let tx = tx.clone();
                        connections.spawn(async move {
                            if let Err(e) = handle_connection(stream, peer, tx).await {
                                debug!("Connection from {} closed: {}", peer, e);
                            }
                        });
                    }
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                    }
                }
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    tx: mpsc::Sender<Incoming>,
) -> Result<()> {
    stream.set_nodelay(true)?;
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    while let Some(payload) = read_frame(&mut reader).await? {
        let (reply_tx, reply_rx) = oneshot::channel();
        let incoming = Incoming {
            payload,
            peer,
            reply_tx,
        };
        if tx.send(incoming).await.is_err() {
            break;
        }
        // Sender dropped means the listener is gone
        let Ok(reply) = reply_rx.await else {
            break;
        };
        write_frame(&mut writer, &reply).await?;
    }

    Ok(())
}
