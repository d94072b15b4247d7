//! # Consul Catalog
//!
//! Registry and discovery backed by a Consul agent's HTTP API. Consul owns
//! storage and runs the health checks; this module only translates.
//!
//! - register: `PUT /v1/agent/service/register`
//! - deregister: `PUT /v1/agent/service/deregister/<id>`
//! - resolve: `GET /v1/health/service/<name>?passing=true`

use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::info;

use crate::address::Address;
use crate::error::Error;
use crate::error::Result;
use crate::health::HealthCheck;
use crate::health::Probe;
use crate::selection::Selection;
use crate::selection::Selector;
use crate::traits::ServiceDiscovery;
use crate::traits::ServiceRegistry;
use crate::traits::registration_id;

/// Body of an agent service registration.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct AgentServiceRegistration {
    #[serde(rename = "ID")]
    pub id: String,
    pub name: String,
    pub tags: Vec<String>,
    pub address: String,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check: Option<AgentServiceCheck>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct AgentServiceCheck {
    #[serde(rename = "TCP")]
    pub tcp: String,
    pub interval: String,
    pub timeout: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deregister_critical_service_after: Option<String>,
}

impl AgentServiceRegistration {
    pub fn new(service: &str, address: &Address, check: &HealthCheck) -> Self {
        let check = match check.probe {
            Probe::Tcp => Some(AgentServiceCheck {
                tcp: address.to_string(),
                interval: go_duration(check.interval),
                timeout: go_duration(check.timeout),
                deregister_critical_service_after: check.deregister_after.map(go_duration),
            }),
            Probe::Disabled => None,
        };

        Self {
            id: registration_id(service, address),
            name: service.to_string(),
            tags: vec![format!("urlprefix-/{}", service)],
            address: address.host.clone(),
            port: address.port,
            check,
        }
    }
}

/// One element of the `/v1/health/service` response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HealthEntry {
    pub node: HealthNode,
    pub service: HealthService,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HealthNode {
    #[serde(default)]
    pub address: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HealthService {
    #[serde(rename = "ID", default)]
    pub id: String,
    #[serde(default)]
    pub address: String,
    pub port: u16,
}

impl HealthEntry {
    /// The service address, falling back to the node address when the
    /// service was registered without one.
    pub fn address(&self) -> Address {
        let host = if self.service.address.is_empty() {
            &self.node.address
        } else {
            &self.service.address
        };
        Address::new(host.clone(), self.service.port)
    }
}

/// Formats a duration the way Consul parses it ("1s", "1500ms").
pub fn go_duration(d: Duration) -> String {
    if d.subsec_millis() == 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{}ms", d.as_millis())
    }
}

pub struct ConsulCatalog {
    base: String,
    http: reqwest::Client,
    selector: Selector,
}

impl ConsulCatalog {
    /// Connects to the agent at `host:port`.
    pub fn new(agent: &str) -> Result<Self> {
        Self::with_selection(agent, Selection::default())
    }

    pub fn with_selection(agent: &str, selection: Selection) -> Result<Self> {
        let agent: Address = agent.parse()?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            base: format!("http://{}", agent),
            http,
            selector: Selector::new(selection),
        })
    }

    /// Base URL of the agent API.
    pub fn base_url(&self) -> &str {
        &self.base
    }

    /// Every instance of `service` whose checks are all passing.
    pub async fn passing(&self, service: &str) -> Result<Vec<Address>> {
        let url = format!("{}/v1/health/service/{}", self.base, service);
        let entries: Vec<HealthEntry> = self
            .http
            .get(&url)
            .query(&[("passing", "true")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        debug!(service, count = entries.len(), "consul returned passing instances");
        Ok(entries.iter().map(HealthEntry::address).collect())
    }
}

#[async_trait::async_trait]
impl ServiceDiscovery for ConsulCatalog {
    async fn resolve(&self, service: &str) -> Result<Address> {
        let candidates = self.passing(service).await?;
        self.selector
            .pick(&candidates)
            .cloned()
            .ok_or_else(|| Error::NotFound(service.to_string()))
    }
}

#[async_trait::async_trait]
impl ServiceRegistry for ConsulCatalog {
    async fn register(&self, service: &str, address: &Address, check: HealthCheck) -> Result<()> {
        let body = AgentServiceRegistration::new(service, address, &check);
        let url = format!("{}/v1/agent/service/register", self.base);

        // Consul keys registrations by ID, so re-registering replaces.
        self.http
            .put(&url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        info!(id = %body.id, %address, "service registered with consul");
        Ok(())
    }

    async fn deregister(&self, service: &str, address: &Address) -> Result<()> {
        let id = registration_id(service, address);
        let url = format!("{}/v1/agent/service/deregister/{}", self.base, id);

        self.http
            .put(&url)
            .send()
            .await?
            .error_for_status()?;

        info!(%id, "service deregistered from consul");
        Ok(())
    }
}
