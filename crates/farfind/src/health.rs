//! # Health Checks
//!
//! Describes how a registry should decide whether a registered address is
//! still alive, and provides the TCP reachability probe used by the in-memory
//! catalog.

use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use tokio::net::TcpStream;

use crate::address::Address;

/// How liveness is established.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Probe {
    /// Healthy while a TCP connection to the address can be opened.
    Tcp,
    /// Never probed; the registration is always considered healthy.
    Disabled,
}

/// Liveness probe attached to a registration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub probe: Probe,
    /// Time between probes.
    pub interval: Duration,
    /// Budget for one probe.
    pub timeout: Duration,
    /// Drop the registration once it has been unhealthy this long.
    pub deregister_after: Option<Duration>,
}

impl HealthCheck {
    /// A TCP probe every `interval`.
    pub fn tcp(interval: Duration) -> Self {
        Self {
            probe: Probe::Tcp,
            interval,
            timeout: interval,
            deregister_after: None,
        }
    }

    /// No probing at all.
    pub fn disabled() -> Self {
        Self {
            probe: Probe::Disabled,
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn deregister_after(mut self, after: Duration) -> Self {
        self.deregister_after = Some(after);
        self
    }
}

/// TCP probe once a second.
impl Default for HealthCheck {
    fn default() -> Self {
        Self::tcp(Duration::from_secs(1))
    }
}

/// Returns true if a TCP connection to `address` opens within `timeout`.
pub async fn probe_tcp(address: &Address, timeout: Duration) -> bool {
    let target = (address.host.as_str(), address.port);
    matches!(
        tokio::time::timeout(timeout, TcpStream::connect(target)).await,
        Ok(Ok(_))
    )
}
