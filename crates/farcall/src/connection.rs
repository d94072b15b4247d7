//! # Connection with Async Pump
//!
//! One live transport to one remote address, shared by every call targeting
//! that address. A background pump task reads replies and routes them to the
//! pending-call table by request id.
//!
//! When the transport fails the connection tears itself down exactly once:
//! it is marked dead, every call still waiting on it is released with
//! `ConnectionLost`, and its owner is told to forget it.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use tokio::task::JoinHandle;
use tracing::debug;
use tracing::warn;

use farfind::Address;
use farwire::Codec;
use farwire::Frame;

use crate::error::CallError;
use crate::error::Result;
use crate::pending::PendingCalls;
use crate::transport;
use crate::transport::Transport;

/// Strong type for connection identifiers.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

type OnClose = Box<dyn Fn(ConnectionId) + Send + Sync>;

struct Shared {
    id: ConnectionId,
    address: Address,
    transport: Arc<dyn Transport>,
    codec: Arc<dyn Codec>,
    pending: Arc<PendingCalls>,
    alive: AtomicBool,
    on_close: OnClose,
}

impl Shared {
    fn route(&self, bytes: &[u8]) {
        match self.codec.decode(bytes) {
            Ok(Frame::Reply(response)) => {
                let id = response.id.clone();
                self.pending.complete(&id, response);
            }
            Ok(Frame::Call(request)) => {
                warn!(connection = %self.id, id = %request.id, "ignoring call frame sent by server");
            }
            // A bad frame fails only the call it belongs to, if that can be told.
            Err(e) => match self.codec.peek_id(bytes) {
                Ok(id) => {
                    warn!(connection = %self.id, %id, error = %e, "undecodable response");
                    self.pending.cancel(&id, CallError::Codec(e.to_string()));
                }
                Err(_) => {
                    warn!(connection = %self.id, error = %e, "dropping unattributable frame");
                }
            },
        }
    }

    fn teardown(&self, reason: &str) {
        if !self.alive.swap(false, Ordering::SeqCst) {
            return;
        }
        self.transport.close();

        let released = self.pending.cancel_connection(self.id, || CallError::ConnectionLost {
            address: self.address.clone(),
            reason: reason.to_string(),
        });
        warn!(
            connection = %self.id,
            address = %self.address,
            released,
            reason,
            "connection closed"
        );
        (self.on_close)(self.id);
    }
}

pub struct Connection {
    shared: Arc<Shared>,
    pump: JoinHandle<()>,
}

impl Connection {
    /// Wraps `transport` and spawns its pump task.
    ///
    /// `on_close` runs once, after the connection is marked dead and its
    /// pending calls are released.
    pub fn open(
        id: ConnectionId,
        address: Address,
        transport: Box<dyn Transport>,
        codec: Arc<dyn Codec>,
        pending: Arc<PendingCalls>,
        on_close: impl Fn(ConnectionId) + Send + Sync + 'static,
    ) -> Self {
        let shared = Arc::new(Shared {
            id,
            address,
            transport: Arc::from(transport),
            codec,
            pending,
            alive: AtomicBool::new(true),
            on_close: Box::new(on_close),
        });

        let pump = tokio::spawn(Self::pump(Arc::clone(&shared)));
        Self { shared, pump }
    }

    async fn pump(shared: Arc<Shared>) {
        let reason = loop {
            match shared.transport.recv().await {
                Ok(Some(bytes)) => shared.route(&bytes),
                Ok(None) => break "peer closed the connection".to_string(),
                Err(e) => break e.to_string(),
            }
        };
        debug!(connection = %shared.id, "pump stopped");
        shared.teardown(&reason);
    }

    pub fn id(&self) -> ConnectionId {
        self.shared.id
    }

    pub fn address(&self) -> &Address {
        &self.shared.address
    }

    pub fn is_alive(&self) -> bool {
        self.shared.alive.load(Ordering::SeqCst)
    }

    /// Writes one encoded request.
    ///
    /// An oversized payload fails only this call. Any other write failure
    /// means the connection is unusable and is torn down.
    pub async fn send(&self, payload: &[u8]) -> Result<()> {
        match self.shared.transport.send(payload).await {
            Ok(()) => Ok(()),
            Err(transport::Error::FrameTooLarge { len, max }) => Err(CallError::Codec(format!(
                "request of {} bytes exceeds frame limit of {} bytes",
                len, max
            ))),
            Err(e) => {
                let reason = e.to_string();
                self.shared.teardown(&reason);
                Err(CallError::ConnectionLost { address: self.shared.address.clone(), reason })
            }
        }
    }

    /// Tears the connection down as if the transport had failed.
    pub fn close(&self, reason: &str) {
        self.shared.teardown(reason);
        self.pump.abort();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shared.teardown("connection dropped");
        self.pump.abort();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.shared.id)
            .field("address", &self.shared.address)
            .field("alive", &self.is_alive())
            .finish()
    }
}
