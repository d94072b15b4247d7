//! # farfind
//!
//! Decouples logical service names from physical addresses.
//!
//! ## Philosophy
//!
//! - **Capabilities, not backends**: callers hold `Arc<dyn ServiceDiscovery>` or
//!   `Arc<dyn ServiceRegistry>` and never learn where names are stored.
//! - **Only healthy answers**: discovery never hands out an instance its
//!   backend reports as failing; an empty healthy set is `NotFound`.
//! - **Replaceable choice**: which of several healthy instances is returned is
//!   a `Selection` policy, round-robin unless configured otherwise.

pub mod address;
pub mod consul;
pub mod error;
pub mod fixed;
pub mod health;
pub mod memory;
pub mod selection;
pub mod traits;

pub use address::Address;
pub use consul::ConsulCatalog;
pub use error::Error;
pub use error::Result;
pub use fixed::StaticDiscovery;
pub use health::HealthCheck;
pub use health::Probe;
pub use memory::InstanceStatus;
pub use memory::MemoryCatalog;
pub use selection::Selection;
pub use selection::Selector;
pub use traits::ServiceDiscovery;
pub use traits::ServiceRegistry;
pub use traits::registration_id;
