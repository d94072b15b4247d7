//! # Call Dispatcher
//!
//! Turns one method invocation into one remote call: id, request, address,
//! connection, pending entry, write, wait.
//!
//! The dispatcher holds no per-call state. Everything it mutates lives in the
//! shared pending-call table and connection manager.
//!
//! ## Invariants
//!
//! - Discovery failures happen before any network I/O.
//! - A pending entry is registered before the request is written, so a reply
//!   can never arrive ahead of its waiter.
//! - Every exit path leaves no entry behind for the call's id.
//! - The call deadline covers the write as well as the wait. A write that
//!   outlives it closes the connection, since part of the frame may already
//!   be on the wire.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;
use tracing::warn;
use uuid::Uuid;

use farfind::ServiceDiscovery;
use farwire::Codec;
use farwire::Frame;
use farwire::Request;
use farwire::RequestId;

use crate::error::CallError;
use crate::error::Result;
use crate::manager::ConnectionManager;
use crate::pending::PendingCalls;

/// Builds a service-qualified random id, e.g. `Greeter-6f1c...`.
pub fn next_request_id(service: &str) -> RequestId {
    RequestId(format!("{}-{}", service, Uuid::new_v4()))
}

#[derive(Clone)]
pub struct Dispatcher {
    discovery: Arc<dyn ServiceDiscovery>,
    connections: Arc<ConnectionManager>,
    pending: Arc<PendingCalls>,
    codec: Arc<dyn Codec>,
    call_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        discovery: Arc<dyn ServiceDiscovery>,
        connections: Arc<ConnectionManager>,
        pending: Arc<PendingCalls>,
        codec: Arc<dyn Codec>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            discovery,
            connections,
            pending,
            codec,
            call_timeout,
        }
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Performs the remote call and returns the raw result value.
    ///
    /// `interface` doubles as the logical service name handed to discovery.
    pub async fn invoke(
        &self,
        interface: &str,
        method: &str,
        args: Vec<Value>,
        param_types: Vec<String>,
    ) -> Result<Value> {
        let id = next_request_id(interface);
        let request = Request::new(id.clone(), interface, method, args, param_types);
        let payload = self.codec.encode(&Frame::Call(request))?;

        let address = self.discovery.resolve(interface).await.map_err(|e| {
            CallError::AddressResolution {
                service: interface.to_string(),
                reason: e.to_string(),
            }
        })?;

        let conn = self.connections.get_connection(&address).await?;
        let waiter = self.pending.register(id.clone(), conn.id(), self.call_timeout)?;

        // Teardown may have swept the table between lookup and register.
        if !conn.is_alive() {
            return Err(CallError::ConnectionLost {
                address,
                reason: "connection closed before the request was sent".into(),
            });
        }

        debug!(%id, %address, connection = %conn.id(), method, "sending request");
        match tokio::time::timeout_at(waiter.deadline(), conn.send(&payload)).await {
            Ok(sent) => sent?,
            Err(_) => {
                warn!(%id, %address, connection = %conn.id(), "request write outlived the call deadline");
                conn.close("request write timed out");
                return Err(CallError::CallTimeout { id, after: waiter.timeout() });
            }
        }

        match waiter.wait().await {
            Ok(response) => response.into_outcome().map_err(|fault| {
                debug!(%id, %fault, "remote side reported a fault");
                CallError::RemoteInvocation(fault)
            }),
            Err(e) => {
                warn!(%id, %address, error = %e, "call failed");
                Err(e)
            }
        }
    }

    /// Performs the remote call and decodes the result as `R`.
    pub async fn call<R: DeserializeOwned>(
        &self,
        interface: &str,
        method: &str,
        args: Vec<Value>,
        param_types: Vec<String>,
    ) -> Result<R> {
        let value = self.invoke(interface, method, args, param_types).await?;
        serde_json::from_value(value).map_err(|e| CallError::ResultType {
            method: format!("{}.{}", interface, method),
            reason: e.to_string(),
        })
    }
}
