//! # Courier Networking
//!
//! Client-side plumbing that sits between discovery and the wire: reuse of
//! live connections per endpoint and the strategies that pick an endpoint
//! for each call.

pub mod connection_cache;
pub mod load_balancer;

pub use connection_cache::{ActiveConnection, ConnectionCache};
pub use load_balancer::{
    ConsistentHashLoadBalancer, LoadBalanceStrategy, LoadBalancer, RandomLoadBalancer,
    RoundRobinLoadBalancer,
};
