//! Load balancing strategies for picking one instance per call

use courier_core::{CallRequest, Endpoint, Error, InstanceList, Result};
use dashmap::DashMap;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Virtual nodes placed on the ring for every instance
pub const DEFAULT_REPLICAS: usize = 160;

/// Picks one endpoint out of a service's live instances
pub trait LoadBalancer: Send + Sync {
    /// Select an endpoint for `request`. Fails with `NotFound` on an empty list.
    fn select(&self, instances: &InstanceList, request: &CallRequest) -> Result<Endpoint>;

    /// Strategy name, as used in configuration
    fn name(&self) -> &'static str;
}

/// Load balancing strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadBalanceStrategy {
    /// Uniform random selection
    Random,
    /// Cyclic selection per service
    RoundRobin,
    /// Hash ring with virtual nodes, keyed by service and arguments
    ConsistentHash,
}

impl Default for LoadBalanceStrategy {
    fn default() -> Self {
        LoadBalanceStrategy::RoundRobin
    }
}

impl FromStr for LoadBalanceStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "random" => Ok(LoadBalanceStrategy::Random),
            "round_robin" | "roundrobin" => Ok(LoadBalanceStrategy::RoundRobin),
            "hash" | "consistent_hash" | "consistenthash" => Ok(LoadBalanceStrategy::ConsistentHash),
            other => Err(Error::Config(format!("Unknown load balancer: {}", other))),
        }
    }
}

impl LoadBalanceStrategy {
    pub fn build(&self) -> Arc<dyn LoadBalancer> {
        match self {
            LoadBalanceStrategy::Random => Arc::new(RandomLoadBalancer),
            LoadBalanceStrategy::RoundRobin => Arc::new(RoundRobinLoadBalancer::new()),
            LoadBalanceStrategy::ConsistentHash => Arc::new(ConsistentHashLoadBalancer::new()),
        }
    }
}

fn ensure_not_empty(instances: &InstanceList) -> Result<()> {
    if instances.is_empty() {
        return Err(Error::NotFound(format!(
            "No instances to select from for {}",
            instances.service_name()
        )));
    }
    Ok(())
}

/// Stateless uniform random selection
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomLoadBalancer;

impl LoadBalancer for RandomLoadBalancer {
    fn select(&self, instances: &InstanceList, _request: &CallRequest) -> Result<Endpoint> {
        ensure_not_empty(instances)?;
        let index = rand::thread_rng().gen_range(0..instances.len());
        Ok(instances.endpoints()[index].clone())
    }

    fn name(&self) -> &'static str {
        "random"
    }
}

struct RoundRobinSelector {
    token: u64,
    cursor: AtomicUsize,
}

impl RoundRobinSelector {
    fn new(token: u64) -> Self {
        Self {
            token,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Advance the cursor and return its new value
    fn next(&self, len: usize) -> usize {
        loop {
            let current = self.cursor.load(Ordering::Acquire);
            let next = (current + 1) % len;
            if self
                .cursor
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return next;
            }
        }
    }
}

/// Round-robin selection with one cursor per service
#[derive(Default)]
pub struct RoundRobinLoadBalancer {
    selectors: DashMap<String, Arc<RoundRobinSelector>>,
}

impl RoundRobinLoadBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    fn selector(&self, instances: &InstanceList) -> Arc<RoundRobinSelector> {
        let cached = self
            .selectors
            .get(instances.service_name())
            .map(|selector| Arc::clone(selector.value()));

        match cached {
            Some(selector) if selector.token == instances.token() => selector,
            _ => {
                debug!(
                    "Building round-robin selector for {} ({} instances)",
                    instances.service_name(),
                    instances.len()
                );
                let selector = Arc::new(RoundRobinSelector::new(instances.token()));
                self.selectors
                    .insert(instances.service_name().to_string(), Arc::clone(&selector));
                selector
            }
        }
    }
}

impl LoadBalancer for RoundRobinLoadBalancer {
    fn select(&self, instances: &InstanceList, _request: &CallRequest) -> Result<Endpoint> {
        ensure_not_empty(instances)?;
        let index = self.selector(instances).next(instances.len());
        trace!("Round-robin picked index {} for {}", index, instances.service_name());
        Ok(instances.endpoints()[index].clone())
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}

struct HashRing {
    token: u64,
    ring: BTreeMap<u32, Endpoint>,
}

impl HashRing {
    fn build(instances: &InstanceList, replicas: usize) -> Self {
        let mut ring = BTreeMap::new();
        for endpoint in instances.endpoints() {
            let address = endpoint.address();
            for i in 0..replicas / 4 {
                let digest = digest(&format!("{}{}", address, i));
                for lane_index in 0..4 {
                    ring.insert(lane(&digest, lane_index), endpoint.clone());
                }
            }
        }

        Self {
            token: instances.token(),
            ring,
        }
    }

    /// First point at or after `hash`, wrapping to the start of the ring
    fn locate(&self, hash: u32) -> Option<&Endpoint> {
        self.ring
            .range(hash..)
            .next()
            .or_else(|| self.ring.iter().next())
            .map(|(_, endpoint)| endpoint)
    }
}

fn digest(key: &str) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(key.as_bytes()));
    out
}

fn lane(digest: &[u8; 32], index: usize) -> u32 {
    let offset = index * 4;
    u32::from_le_bytes([
        digest[offset],
        digest[offset + 1],
        digest[offset + 2],
        digest[offset + 3],
    ])
}

/// Consistent hashing over a ring of virtual nodes, one ring per service
pub struct ConsistentHashLoadBalancer {
    replicas: usize,
    rings: DashMap<String, Arc<HashRing>>,
}

impl Default for ConsistentHashLoadBalancer {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsistentHashLoadBalancer {
    pub fn new() -> Self {
        Self::with_replicas(DEFAULT_REPLICAS)
    }

    /// `replicas` is rounded down to a multiple of four, with a floor of four
    pub fn with_replicas(replicas: usize) -> Self {
        Self {
            replicas: replicas.max(4),
            rings: DashMap::new(),
        }
    }

    fn ring(&self, instances: &InstanceList) -> Arc<HashRing> {
        let cached = self
            .rings
            .get(instances.service_name())
            .map(|ring| Arc::clone(ring.value()));

        match cached {
            Some(ring) if ring.token == instances.token() => ring,
            _ => {
                debug!(
                    "Building hash ring for {} ({} instances, {} replicas)",
                    instances.service_name(),
                    instances.len(),
                    self.replicas
                );
                let ring = Arc::new(HashRing::build(instances, self.replicas));
                self.rings
                    .insert(instances.service_name().to_string(), Arc::clone(&ring));
                ring
            }
        }
    }
}

impl LoadBalancer for ConsistentHashLoadBalancer {
    fn select(&self, instances: &InstanceList, request: &CallRequest) -> Result<Endpoint> {
        ensure_not_empty(instances)?;
        let key = format!("{}{}", instances.service_name(), request.arguments_key());
        let hash = lane(&digest(&key), 0);

        self.ring(instances)
            .locate(hash)
            .cloned()
            .ok_or_else(|| Error::IllegalState("Hash ring is empty".to_string()))
    }

    fn name(&self) -> &'static str {
        "consistent_hash"
    }
}
