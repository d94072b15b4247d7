//! # Client
//!
//! Owns the shared call machinery and hands out proxies. Every proxy from one
//! client shares the same pending-call table and connection cache.

use std::sync::Arc;

use farfind::ServiceDiscovery;
use farwire::Codec;
use farwire::JsonCodec;

use crate::config::ClientConfig;
use crate::dispatcher::Dispatcher;
use crate::manager::ConnectionManager;
use crate::pending::PendingCalls;
use crate::proxy::RemoteProxy;
use crate::transport::Connector;
use crate::transport::TcpConnector;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    MissingDiscovery,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingDiscovery => write!(f, "A client needs a service discovery backend"),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

pub struct Client {
    config: ClientConfig,
    dispatcher: Dispatcher,
    connections: Arc<ConnectionManager>,
    pending: Arc<PendingCalls>,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// A proxy for the interface behind `P`.
    pub fn proxy<P: RemoteProxy>(&self) -> P {
        P::from_dispatcher(self.dispatcher.clone())
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn pending(&self) -> &Arc<PendingCalls> {
        &self.pending
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    /// Closes every connection. In-flight calls fail with `ConnectionLost`;
    /// later calls open fresh connections.
    pub fn shutdown(&self) {
        self.connections.close_all();
    }
}

/// Fluent builder for a `Client`.
pub struct ClientBuilder {
    config: ClientConfig,
    discovery: Option<Arc<dyn ServiceDiscovery>>,
    connector: Option<Arc<dyn Connector>>,
    codec: Arc<dyn Codec>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            discovery: None,
            connector: None,
            codec: Arc::new(JsonCodec),
        }
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn discovery(mut self, discovery: Arc<dyn ServiceDiscovery>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    /// Overrides how connections are opened. Defaults to TCP.
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn build(self) -> Result<Client> {
        let discovery = self.discovery.ok_or(Error::MissingDiscovery)?;
        let max_frame_len = self.config.max_frame_len;
        let connector: Arc<dyn Connector> = match self.connector {
            Some(connector) => connector,
            None => Arc::new(TcpConnector { max_frame_len }),
        };

        let pending = Arc::new(PendingCalls::new());
        let connections = Arc::new(ConnectionManager::new(
            connector,
            Arc::clone(&self.codec),
            Arc::clone(&pending),
            self.config.connect_timeout,
        ));
        let dispatcher = Dispatcher::new(
            discovery,
            Arc::clone(&connections),
            Arc::clone(&pending),
            self.codec,
            self.config.call_timeout,
        );

        Ok(Client {
            config: self.config,
            dispatcher,
            connections,
            pending,
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
