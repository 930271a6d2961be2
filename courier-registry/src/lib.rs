//! # Courier Registry
//!
//! The service registry interface, two process-local registries, and the
//! discovery cache that feeds load balancing on the client side.

pub mod discovery;
pub mod registry;

pub use discovery::ServiceDiscovery;
pub use registry::{
    registry_from_config, InMemoryRegistry, InstanceListener, ServiceRegistry, StaticRegistry,
};
