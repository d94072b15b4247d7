//! # Transport Abstraction
//!
//! A minimal, async interface for moving whole payloads between a client and
//! a server.
//!
//! ## Philosophy
//!
//! - **Byte-Oriented**: The Transport knows nothing about requests, responses
//!   or ids. It moves opaque buffers.
//! - **Duplex**: Sends and receives are independent. Any number of tasks may
//!   send concurrently while a single reader drains replies in whatever order
//!   they arrive.
//! - **Atomic Writes**: One `send` puts exactly one complete frame on the wire.
//!   Concurrent senders never interleave fragments.

use std::fmt;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

use farfind::Address;

/// Errors that occur at the network/transport layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The peer is unreachable or the connection was dropped.
    ConnectionLost(String),
    /// The payload exceeds the frame limit. Nothing was written.
    FrameTooLarge { len: usize, max: usize },
    /// Generic I/O error or internal transport failure.
    Io(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            Self::FrameTooLarge { len, max } => {
                write!(f, "Payload of {} bytes exceeds limit of {} bytes", len, max)
            }
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<farwire::Error> for Error {
    fn from(e: farwire::Error) -> Self {
        match e {
            farwire::Error::FrameTooLarge { len, max } => Self::FrameTooLarge { len, max },
            other => Self::Io(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A bidirectional pipe of whole payloads.
///
/// This trait is designed to be object-safe (`Arc<dyn Transport>`).
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends one payload.
    ///
    /// # invariants
    /// - The payload arrives whole or not at all.
    /// - Safe to call from many tasks at once.
    /// - Should not interpret the payload content.
    async fn send(&self, payload: &[u8]) -> Result<()>;

    /// Receives the next payload. `Ok(None)` means the peer closed cleanly.
    async fn recv(&self) -> Result<Option<Vec<u8>>>;

    /// Stops sending. Sends still queued or blocked fail with `ConnectionLost`.
    fn close(&self) {}
}

/// Opens transports to addresses.
#[async_trait::async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, address: &Address) -> Result<Box<dyn Transport>>;
}

struct Outgoing {
    payload: Vec<u8>,
    done: oneshot::Sender<Result<()>>,
}

/// Length-prefixed frames over a TCP stream.
///
/// Writes go through a dedicated task so a frame, once accepted, is always
/// written to completion even if the sending caller stops waiting. Only
/// `close` interrupts a write, and it is called when the connection is being
/// abandoned anyway.
pub struct TcpTransport {
    reader: Mutex<OwnedReadHalf>,
    outgoing: mpsc::UnboundedSender<Outgoing>,
    writer: JoinHandle<()>,
    max_frame_len: usize,
}

impl TcpTransport {
    pub fn new(stream: TcpStream, max_frame_len: usize) -> Self {
        let (read_half, write_half) = stream.into_split();
        let (outgoing, queue) = mpsc::unbounded_channel();
        let writer = tokio::spawn(Self::write_loop(write_half, queue, max_frame_len));

        Self {
            reader: Mutex::new(read_half),
            outgoing,
            writer,
            max_frame_len,
        }
    }

    async fn write_loop(
        mut half: OwnedWriteHalf,
        mut queue: mpsc::UnboundedReceiver<Outgoing>,
        max_frame_len: usize,
    ) {
        while let Some(Outgoing { payload, done }) = queue.recv().await {
            let result = farwire::write_frame(&mut half, &payload, max_frame_len)
                .await
                .map_err(Error::from);
            let failed = result.is_err();
            let _ = done.send(result);
            if failed {
                break;
            }
        }
        debug!("tcp writer stopped");
        let _ = half.shutdown().await;
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.writer.abort();
    }
}

#[async_trait::async_trait]
impl Transport for TcpTransport {
    async fn send(&self, payload: &[u8]) -> Result<()> {
        if payload.len() > self.max_frame_len {
            return Err(Error::FrameTooLarge { len: payload.len(), max: self.max_frame_len });
        }

        let (done, written) = oneshot::channel();
        self.outgoing
            .send(Outgoing { payload: payload.to_vec(), done })
            .map_err(|_| Error::ConnectionLost("writer stopped".into()))?;

        written
            .await
            .map_err(|_| Error::ConnectionLost("writer stopped".into()))?
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>> {
        let mut reader = self.reader.lock().await;
        Ok(farwire::read_frame(&mut *reader, self.max_frame_len).await?)
    }

    fn close(&self) {
        self.writer.abort();
    }
}

/// Opens plain TCP connections.
#[derive(Debug, Clone, Copy)]
pub struct TcpConnector {
    pub max_frame_len: usize,
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self { max_frame_len: farwire::DEFAULT_MAX_FRAME_LEN }
    }
}

#[async_trait::async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, address: &Address) -> Result<Box<dyn Transport>> {
        let stream = TcpStream::connect((address.host.as_str(), address.port))
            .await
            .map_err(|e| Error::ConnectionLost(e.to_string()))?;
        stream.set_nodelay(true).map_err(|e| Error::Io(e.to_string()))?;

        debug!(%address, "tcp connection established");
        Ok(Box::new(TcpTransport::new(stream, self.max_frame_len)))
    }
}
