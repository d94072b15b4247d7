//! Discovery over a fixed name -> addresses table.

use std::collections::HashMap;

use crate::address::Address;
use crate::error::Error;
use crate::error::Result;
use crate::selection::Selection;
use crate::selection::Selector;
use crate::traits::ServiceDiscovery;

/// Resolves from a table built up front. No health checking: every listed
/// address is a candidate.
#[derive(Debug, Default)]
pub struct StaticDiscovery {
    services: HashMap<String, Vec<Address>>,
    selector: Selector,
}

impl StaticDiscovery {
    pub fn new(selection: Selection) -> Self {
        Self {
            services: HashMap::new(),
            selector: Selector::new(selection),
        }
    }

    /// Adds `address` to the candidates for `service`.
    pub fn with(mut self, service: impl Into<String>, address: Address) -> Self {
        let addrs = self.services.entry(service.into()).or_default();
        if !addrs.contains(&address) {
            addrs.push(address);
        }
        self
    }
}

#[async_trait::async_trait]
impl ServiceDiscovery for StaticDiscovery {
    async fn resolve(&self, service: &str) -> Result<Address> {
        let candidates = self.services.get(service).map(Vec::as_slice).unwrap_or(&[]);
        self.selector
            .pick(candidates)
            .cloned()
            .ok_or_else(|| Error::NotFound(service.to_string()))
    }
}
