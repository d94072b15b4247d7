//! # Connection Manager
//!
//! Maps remote addresses to shared, live connections.
//!
//! ## Invariants
//!
//! - At most one connection per address is cached, and a cached connection
//!   that has died is never handed out.
//! - Opening is single-flight per address: concurrent callers for the same
//!   address share one connect attempt and its outcome, success or failure,
//!   so none waits longer than one connect timeout.
//! - An attempt is forgotten once it settles; the next caller after a failure
//!   starts a fresh one.
//! - A dead connection removes itself from the cache; a newer connection for
//!   the same address is never evicted by an older one's teardown.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::OnceCell;
use tracing::debug;
use tracing::info;
use tracing::warn;

use farfind::Address;
use farwire::Codec;

use crate::connection::Connection;
use crate::connection::ConnectionId;
use crate::error::CallError;
use crate::error::Result;
use crate::pending::PendingCalls;
use crate::transport::Connector;

type Cache = DashMap<Address, Arc<Connection>>;

/// The settled outcome of one connect attempt, shared by everyone who joined it.
type Attempt = OnceCell<Result<Arc<Connection>>>;

pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    codec: Arc<dyn Codec>,
    pending: Arc<PendingCalls>,
    connections: Arc<Cache>,
    opening: DashMap<Address, Arc<Attempt>>,
    connect_timeout: Duration,
    next_id: AtomicU64,
}

impl ConnectionManager {
    pub fn new(
        connector: Arc<dyn Connector>,
        codec: Arc<dyn Codec>,
        pending: Arc<PendingCalls>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            connector,
            codec,
            pending,
            connections: Arc::new(DashMap::new()),
            opening: DashMap::new(),
            connect_timeout,
            next_id: AtomicU64::new(1),
        }
    }

    /// Returns the live connection for `address`, opening one if needed.
    pub async fn get_connection(&self, address: &Address) -> Result<Arc<Connection>> {
        if let Some(conn) = self.live(address) {
            return Ok(conn);
        }

        let attempt = self.opening.entry(address.clone()).or_default().clone();
        let outcome = attempt.get_or_init(|| self.open(address)).await.clone();
        self.opening.remove_if(address, |_, current| Arc::ptr_eq(current, &attempt));
        outcome
    }

    async fn open(&self, address: &Address) -> Result<Arc<Connection>> {
        // A previous attempt may have settled between our lookup and joining.
        if let Some(conn) = self.live(address) {
            return Ok(conn);
        }

        let transport = match tokio::time::timeout(self.connect_timeout, self.connector.connect(address)).await {
            Ok(Ok(transport)) => transport,
            Ok(Err(e)) => {
                warn!(%address, error = %e, "connect failed");
                return Err(CallError::ConnectionUnavailable {
                    address: address.clone(),
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                warn!(%address, timeout = ?self.connect_timeout, "connect timed out");
                return Err(CallError::ConnectionUnavailable {
                    address: address.clone(),
                    reason: format!("no connection within {:?}", self.connect_timeout),
                });
            }
        };

        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let cache = Arc::downgrade(&self.connections);
        let key = address.clone();
        let conn = Arc::new(Connection::open(
            id,
            address.clone(),
            transport,
            Arc::clone(&self.codec),
            Arc::clone(&self.pending),
            move |closed| {
                let Some(cache) = cache.upgrade() else { return };
                if cache.remove_if(&key, |_, c| c.id() == closed).is_some() {
                    debug!(connection = %closed, address = %key, "evicted dead connection");
                }
            },
        ));

        self.connections.insert(address.clone(), Arc::clone(&conn));
        info!(connection = %id, %address, "connection opened");
        Ok(conn)
    }

    fn live(&self, address: &Address) -> Option<Arc<Connection>> {
        self.connections
            .get(address)
            .filter(|conn| conn.is_alive())
            .map(|conn| Arc::clone(conn.value()))
    }

    /// The cached connection for `address`, live or not.
    pub fn cached(&self, address: &Address) -> Option<Arc<Connection>> {
        self.connections.get(address).map(|conn| Arc::clone(conn.value()))
    }

    /// Number of addresses with a connect attempt still in flight.
    pub fn opening(&self) -> usize {
        self.opening.len()
    }

    /// Number of cached connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Closes every cached connection, failing their in-flight calls.
    pub fn close_all(&self) {
        // Collect first: closing evicts, which needs the map's shard locks.
        let all: Vec<Arc<Connection>> = self
            .connections
            .iter()
            .map(|conn| Arc::clone(conn.value()))
            .collect();

        for conn in all {
            conn.close("client shut down");
        }
    }
}
