//! Capability interfaces for locating services.
//!
//! Both traits are object-safe (`Arc<dyn ServiceDiscovery>`), so the backing
//! store can be swapped without touching the client.

use crate::address::Address;
use crate::error::Result;
use crate::health::HealthCheck;

/// Maps a logical service name to one currently-live address.
#[async_trait::async_trait]
pub trait ServiceDiscovery: Send + Sync + 'static {
    /// Resolves `service` to a single healthy address.
    ///
    /// # Errors
    ///
    /// `Error::NotFound` if nothing is registered under the name or every
    /// registered instance is reported unhealthy.
    async fn resolve(&self, service: &str) -> Result<Address>;
}

/// Publishes addresses under service names.
#[async_trait::async_trait]
pub trait ServiceRegistry: Send + Sync + 'static {
    /// Registers `address` under `service` with a liveness check.
    ///
    /// Idempotent per `(service, address)`: registering again replaces the
    /// previous registration and its check.
    async fn register(&self, service: &str, address: &Address, check: HealthCheck) -> Result<()>;

    /// Removes the registration of `address` under `service`, if any.
    async fn deregister(&self, service: &str, address: &Address) -> Result<()>;
}

/// Registration id, unique per `(service, address)`.
pub fn registration_id(service: &str, address: &Address) -> String {
    format!("{}-{}-{}", service, address.host, address.port)
}
