//! # In-Memory Catalog
//!
//! A process-local registry and discovery backend. Each registration with a
//! TCP probe gets a monitor task that re-probes the address at the configured
//! interval and flips the instance between healthy and unhealthy; discovery
//! only ever returns healthy instances.
//!
//! Instances start out healthy and stay so until a probe fails.

use std::sync::Arc;
use std::sync::Weak;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::address::Address;
use crate::error::Error;
use crate::error::Result;
use crate::health::HealthCheck;
use crate::health::Probe;
use crate::health::probe_tcp;
use crate::selection::Selection;
use crate::selection::Selector;
use crate::traits::ServiceDiscovery;
use crate::traits::ServiceRegistry;
use crate::traits::registration_id;

struct Registration {
    /// Distinguishes a replacement from the registration it replaced.
    generation: u64,
    address: Address,
    check: HealthCheck,
    healthy: Arc<AtomicBool>,
    monitor: Option<JoinHandle<()>>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(monitor) = self.monitor.take() {
            monitor.abort();
        }
    }
}

type Services = DashMap<String, Vec<Registration>>;

/// Snapshot of one registered instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstanceStatus {
    pub address: Address,
    pub check: HealthCheck,
    pub healthy: bool,
}

/// Registry and discovery over a shared in-process map.
pub struct MemoryCatalog {
    services: Arc<Services>,
    selector: Selector,
    next_generation: AtomicU64,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::with_selection(Selection::default())
    }

    pub fn with_selection(selection: Selection) -> Self {
        Self {
            services: Arc::new(DashMap::new()),
            selector: Selector::new(selection),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Lists every instance registered under `service`, healthy or not, in
    /// registration order.
    pub fn instances(&self, service: &str) -> Vec<InstanceStatus> {
        self.services
            .get(service)
            .map(|regs| {
                regs.iter()
                    .map(|r| InstanceStatus {
                        address: r.address.clone(),
                        check: r.check.clone(),
                        healthy: r.healthy.load(Ordering::Acquire),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn healthy_addresses(&self, service: &str) -> Vec<Address> {
        self.services
            .get(service)
            .map(|regs| {
                regs.iter()
                    .filter(|r| r.healthy.load(Ordering::Acquire))
                    .map(|r| r.address.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Default for MemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ServiceDiscovery for MemoryCatalog {
    async fn resolve(&self, service: &str) -> Result<Address> {
        let candidates = self.healthy_addresses(service);
        self.selector
            .pick(&candidates)
            .cloned()
            .ok_or_else(|| Error::NotFound(service.to_string()))
    }
}

#[async_trait::async_trait]
impl ServiceRegistry for MemoryCatalog {
    async fn register(&self, service: &str, address: &Address, check: HealthCheck) -> Result<()> {
        if service.is_empty() {
            return Err(Error::Backend("service name must not be empty".into()));
        }

        let id = registration_id(service, address);
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let healthy = Arc::new(AtomicBool::new(true));

        let monitor = match check.probe {
            Probe::Tcp => Some(tokio::spawn(monitor(
                Arc::downgrade(&self.services),
                service.to_string(),
                generation,
                address.clone(),
                check.clone(),
                healthy.clone(),
            ))),
            Probe::Disabled => None,
        };

        let registration = Registration {
            generation,
            address: address.clone(),
            check,
            healthy,
            monitor,
        };

        let mut regs = self.services.entry(service.to_string()).or_default();
        match regs.iter_mut().find(|r| r.address == *address) {
            Some(existing) => {
                // dropping the old registration aborts its monitor
                *existing = registration;
                debug!(%id, "replaced existing registration");
            }
            None => regs.push(registration),
        }
        drop(regs);

        info!(%id, service, %address, "service registered");
        Ok(())
    }

    async fn deregister(&self, service: &str, address: &Address) -> Result<()> {
        let removed = self
            .services
            .get_mut(service)
            .map(|mut regs| {
                let before = regs.len();
                regs.retain(|r| r.address != *address);
                before != regs.len()
            })
            .unwrap_or(false);
        self.services.remove_if(service, |_, regs| regs.is_empty());

        if removed {
            info!(id = %registration_id(service, address), "service deregistered");
        }
        Ok(())
    }
}

/// Removes one specific registration, leaving any replacement alone.
fn remove_generation(services: &Services, service: &str, generation: u64) {
    if let Some(mut regs) = services.get_mut(service) {
        regs.retain(|r| r.generation != generation);
    }
    services.remove_if(service, |_, regs| regs.is_empty());
}

async fn monitor(
    services: Weak<Services>,
    service: String,
    generation: u64,
    address: Address,
    check: HealthCheck,
    healthy: Arc<AtomicBool>,
) {
    let mut unhealthy_since: Option<Instant> = None;

    loop {
        let alive = probe_tcp(&address, check.timeout).await;
        let was_alive = healthy.swap(alive, Ordering::AcqRel);
        if alive != was_alive {
            if alive {
                info!(service, %address, "instance passed health check");
            } else {
                warn!(service, %address, "instance failed health check");
            }
        }

        if alive {
            unhealthy_since = None;
        } else {
            let since = *unhealthy_since.get_or_insert_with(Instant::now);
            if let Some(after) = check.deregister_after {
                if since.elapsed() >= after {
                    warn!(service, %address, ?after, "deregistering instance after prolonged failure");
                    if let Some(services) = services.upgrade() {
                        remove_generation(&services, &service, generation);
                    }
                    return;
                }
            }
        }

        tokio::time::sleep(check.interval).await;
    }
}
