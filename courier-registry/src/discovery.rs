//! Client-side cache of service instances backed by a registry

use crate::registry::{InstanceListener, ServiceRegistry};
use courier_core::{CallRequest, Endpoint, Error, InstanceList, Result};
use courier_net::LoadBalancer;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Resolves a call to one endpoint.
///
/// Instance lists are fetched from the registry on first use, cached, and
/// kept current through a registry subscription made once per service name.
pub struct ServiceDiscovery {
    registry: Arc<dyn ServiceRegistry>,
    load_balancer: Arc<dyn LoadBalancer>,
    cache: Arc<DashMap<String, Arc<InstanceList>>>,
    subscribed: Mutex<HashSet<String>>,
}

impl ServiceDiscovery {
    pub fn new(registry: Arc<dyn ServiceRegistry>, load_balancer: Arc<dyn LoadBalancer>) -> Self {
        Self {
            registry,
            load_balancer,
            cache: Arc::new(DashMap::new()),
            subscribed: Mutex::new(HashSet::new()),
        }
    }

    pub fn load_balancer(&self) -> &Arc<dyn LoadBalancer> {
        &self.load_balancer
    }

    /// Pick the endpoint that should serve `request`
    pub async fn resolve(&self, request: &CallRequest) -> Result<Endpoint> {
        let instances = self.instances(&request.interface_name).await?;
        let endpoint = self.load_balancer.select(&instances, request)?;
        debug!(
            "Resolved {}.{} to {} via {}",
            request.interface_name,
            request.method_name,
            endpoint,
            self.load_balancer.name()
        );
        Ok(endpoint)
    }

    /// Current instances of `service_name`, fetching them on a cold miss
    pub async fn instances(&self, service_name: &str) -> Result<Arc<InstanceList>> {
        if let Some(cached) = self.cached(service_name) {
            return Ok(cached);
        }

        let endpoints = self
            .registry
            .get_all_instances(service_name)
            .await
            .map_err(into_registry_error)?;

        if endpoints.is_empty() {
            return Err(Error::ServiceNotFound(service_name.to_string()));
        }

        // A list pushed by the subscription while fetching is newer than ours
        let instances = Arc::clone(
            self.cache
                .entry(service_name.to_string())
                .or_insert_with(|| Arc::new(InstanceList::new(service_name, endpoints)))
                .value(),
        );
        self.ensure_subscribed(service_name).await?;

        // The subscription may have delivered a newer list
        Ok(self.cached(service_name).unwrap_or(instances))
    }

    /// Cached list for `service_name`, if any
    pub fn cached(&self, service_name: &str) -> Option<Arc<InstanceList>> {
        self.cache
            .get(service_name)
            .map(|entry| Arc::clone(entry.value()))
    }

    async fn ensure_subscribed(&self, service_name: &str) -> Result<()> {
        if !self.subscribed.lock().insert(service_name.to_string()) {
            return Ok(());
        }

        let cache = Arc::clone(&self.cache);
        let listener: InstanceListener = Arc::new(move |name: &str, endpoints: Vec<Endpoint>| {
            apply_update(&cache, name, endpoints);
        });

        if let Err(e) = self.registry.subscribe(service_name, listener).await {
            self.subscribed.lock().remove(service_name);
            return Err(into_registry_error(e));
        }
        debug!("Subscribed to instance changes of {}", service_name);
        Ok(())
    }
}

fn apply_update(cache: &DashMap<String, Arc<InstanceList>>, service_name: &str, endpoints: Vec<Endpoint>) {
    if endpoints.is_empty() {
        if cache.remove(service_name).is_some() {
            info!("All instances of {} went offline", service_name);
        }
        return;
    }

    let updated = InstanceList::new(service_name, endpoints);
    let unchanged = cache
        .get(service_name)
        .map(|current| !current.differs_from(&updated))
        .unwrap_or(false);

    if unchanged {
        debug!("Instances of {} unchanged", service_name);
        return;
    }

    info!("Instances of {} changed, now {}", service_name, updated.len());
    cache.insert(service_name.to_string(), Arc::new(updated));
}

fn into_registry_error(error: Error) -> Error {
    match error {
        Error::Registry(_) => error,
        other => Error::Registry(other.to_string()),
    }
}
