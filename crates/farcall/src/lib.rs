//! # farcall
//!
//! Call a method on a local interface and have it run in a remote process.
//!
//! ## Architecture
//!
//! - `proxy`: `remote_interface!` generates a client type per interface.
//! - `dispatcher`: turns one method call into one request and awaits its reply.
//! - `pending`: correlates replies to waiting callers by request id.
//! - `manager` / `connection`: one shared, multiplexed connection per address.
//! - `transport`: byte pipes (TCP, or in-process channels).
//! - `responder`: the serving side, for demos and tests.
//!
//! Service names resolve to addresses through any `farfind::ServiceDiscovery`.

pub mod channel;
pub mod client;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod manager;
pub mod pending;
pub mod proxy;
pub mod responder;
pub mod transport;

pub use client::Client;
pub use client::ClientBuilder;
pub use config::ClientConfig;
pub use connection::Connection;
pub use connection::ConnectionId;
pub use dispatcher::Dispatcher;
pub use dispatcher::next_request_id;
pub use error::CallError;
pub use error::Result;
pub use manager::ConnectionManager;
pub use pending::PendingCalls;
pub use pending::Waiter;
pub use proxy::RemoteProxy;

#[doc(hidden)]
pub mod __private {
    pub use async_trait::async_trait;

    pub use crate::proxy::to_arg;
}

#[cfg(test)]
mod tests;
