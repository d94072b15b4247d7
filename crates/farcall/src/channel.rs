//! In-process transports over tokio channels.
//!
//! Useful wherever a real socket is unnecessary: tests, and servers living in
//! the same process as their callers.

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use tokio::sync::Mutex;
use tokio::sync::mpsc;

use farfind::Address;

use crate::transport;
use crate::transport::Connector;
use crate::transport::Transport;

/// One end of an in-process connection handed out by `ChannelConnector`.
///
/// The client keeps one end and the serving side receives the other, so a
/// request frame written here is the next frame the server reads. When either
/// end goes away the survivor reads `None`, which the connection pump treats
/// as the peer hanging up.
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>,
}

impl ChannelTransport {
    /// Both ends of a fresh connection: `(client, server)`.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();

        let client = Self { tx: tx_a, rx: Arc::new(Mutex::new(rx_b)) };
        let server = Self { tx: tx_b, rx: Arc::new(Mutex::new(rx_a)) };
        (client, server)
    }
}

#[async_trait::async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, payload: &[u8]) -> transport::Result<()> {
        self.tx
            .send(payload.to_vec())
            .map_err(|_| transport::Error::ConnectionLost("peer end dropped".into()))
    }

    async fn recv(&self) -> transport::Result<Option<Vec<u8>>> {
        let mut rx = self.rx.lock().await;
        Ok(rx.recv().await)
    }
}

/// A connector that hands the far end of every new channel pair to a receiver,
/// the way a listener hands out accepted sockets.
pub struct ChannelConnector {
    accepted: mpsc::UnboundedSender<(Address, ChannelTransport)>,
    connects: AtomicUsize,
}

impl ChannelConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(Address, ChannelTransport)>) {
        let (accepted, incoming) = mpsc::unbounded_channel();
        let connector = Self {
            accepted,
            connects: AtomicUsize::new(0),
        };
        (connector, incoming)
    }

    /// How many connections have been opened so far.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Connector for ChannelConnector {
    async fn connect(&self, address: &Address) -> transport::Result<Box<dyn Transport>> {
        let (client, server) = ChannelTransport::pair();
        self.accepted
            .send((address.clone(), server))
            .map_err(|_| transport::Error::ConnectionLost(format!("nothing accepts {}", address)))?;
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(client))
    }
}
