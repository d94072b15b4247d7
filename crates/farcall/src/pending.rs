//! # Pending-Call Table
//!
//! The single point where outbound requests meet their inbound responses.
//!
//! ## Invariants
//!
//! - An entry exists for an id exactly while its caller has not yet observed
//!   an outcome.
//! - Each entry is filled at most once. Whichever of `complete` or `cancel`
//!   removes it first wins; the other is a no-op that returns `false`.
//! - A response for an unknown id (late, duplicate, or never sent) is
//!   discarded without error.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

use farwire::RequestId;
use farwire::Response;

use crate::connection::ConnectionId;
use crate::error::CallError;
use crate::error::Result;

type Outcome = Result<Response>;

struct Slot {
    connection: ConnectionId,
    tx: oneshot::Sender<Outcome>,
}

#[derive(Default)]
pub struct PendingCalls {
    slots: DashMap<RequestId, Slot>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an entry for `id`, bound to the connection carrying the
    /// request. The returned waiter resolves within `timeout`.
    pub fn register(
        self: &Arc<Self>,
        id: RequestId,
        connection: ConnectionId,
        timeout: Duration,
    ) -> Result<Waiter> {
        let (tx, rx) = oneshot::channel();

        match self.slots.entry(id.clone()) {
            Entry::Occupied(_) => return Err(CallError::DuplicateRequestId(id)),
            Entry::Vacant(vacant) => {
                vacant.insert(Slot { connection, tx });
            }
        }

        Ok(Waiter {
            id,
            timeout,
            deadline: Instant::now() + timeout,
            rx,
            table: Arc::clone(self),
        })
    }

    /// Delivers `response` to the caller waiting on `id`.
    pub fn complete(&self, id: &RequestId, response: Response) -> bool {
        let Some((_, slot)) = self.slots.remove(id) else {
            debug!(%id, "discarding response with no pending call");
            return false;
        };
        // The receiver may already be gone; the entry is removed either way.
        let _ = slot.tx.send(Ok(response));
        true
    }

    /// Removes the entry for `id` and fails its caller with `error`.
    pub fn cancel(&self, id: &RequestId, error: CallError) -> bool {
        let Some((_, slot)) = self.slots.remove(id) else {
            return false;
        };
        let _ = slot.tx.send(Err(error));
        true
    }

    /// Fails every call bound to `connection`. Returns how many were released.
    pub fn cancel_connection(
        &self,
        connection: ConnectionId,
        error: impl Fn() -> CallError,
    ) -> usize {
        let ids: Vec<RequestId> = self
            .slots
            .iter()
            .filter(|slot| slot.connection == connection)
            .map(|slot| slot.key().clone())
            .collect();

        let mut released = 0;
        for id in ids {
            if let Some((_, slot)) = self.slots.remove_if(&id, |_, s| s.connection == connection) {
                let _ = slot.tx.send(Err(error()));
                released += 1;
            }
        }
        released
    }

    pub fn contains(&self, id: &RequestId) -> bool {
        self.slots.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// The caller's half of a pending entry.
///
/// Dropping a waiter before it resolves removes its entry, so abandoned calls
/// never leak slots.
pub struct Waiter {
    id: RequestId,
    timeout: Duration,
    deadline: Instant,
    rx: oneshot::Receiver<Outcome>,
    table: Arc<PendingCalls>,
}

impl Waiter {
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// When this call gives up, counted from registration.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Suspends until the entry is completed, cancelled or the deadline passes.
    ///
    /// On timeout the entry is removed before this returns, so a response
    /// arriving afterwards is discarded by `complete`.
    pub async fn wait(mut self) -> Outcome {
        match tokio::time::timeout_at(self.deadline, &mut self.rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(CallError::Interrupted(self.id.clone())),
            Err(_) => {
                let error = CallError::CallTimeout { id: self.id.clone(), after: self.timeout };
                if self.table.cancel(&self.id, error.clone()) {
                    return Err(error);
                }
                // Lost the race: whoever removed the entry is delivering
                // its outcome.
                match (&mut self.rx).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(CallError::Interrupted(self.id.clone())),
                }
            }
        }
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        self.table.slots.remove(&self.id);
    }
}
