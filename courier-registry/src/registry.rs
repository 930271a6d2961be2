//! Service registry interface and process-local implementations

use async_trait::async_trait;
use courier_config::RegistryConfig;
use courier_core::{Endpoint, Error, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Callback invoked with the full instance list of a service whenever it changes
pub type InstanceListener = Arc<dyn Fn(&str, Vec<Endpoint>) + Send + Sync>;

/// Registry of service instances
#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    /// Publish `endpoint` as an instance of `service_name`
    async fn register_instance(&self, service_name: &str, endpoint: &Endpoint) -> Result<()>;

    /// Withdraw `endpoint` from `service_name`
    async fn deregister_instance(&self, service_name: &str, endpoint: &Endpoint) -> Result<()>;

    /// Current instances of `service_name`, possibly empty
    async fn get_all_instances(&self, service_name: &str) -> Result<Vec<Endpoint>>;

    /// Receive the instance list of `service_name` on every change.
    ///
    /// Implementations deliver the current list once at subscribe time.
    async fn subscribe(&self, service_name: &str, listener: InstanceListener) -> Result<()>;
}

/// Registry held in process memory, shared by servers and clients of one process.
///
/// Listeners are called one delivery at a time, so the last list a listener
/// sees is the registry's current one. A listener must not call back into
/// the registry.
#[derive(Default)]
pub struct InMemoryRegistry {
    services: RwLock<HashMap<String, Vec<Endpoint>>>,
    listeners: RwLock<HashMap<String, Vec<InstanceListener>>>,
    delivery: Mutex<()>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self, service_name: &str) -> Vec<Endpoint> {
        self.services
            .read()
            .get(service_name)
            .cloned()
            .unwrap_or_default()
    }

    fn notify(&self, service_name: &str) {
        // Snapshot and deliver under one lock so deliveries cannot reorder
        let _delivery = self.delivery.lock();
        let listeners = self
            .listeners
            .read()
            .get(service_name)
            .cloned()
            .unwrap_or_default();
        if listeners.is_empty() {
            return;
        }

        let endpoints = self.snapshot(service_name);
        debug!(
            "Notifying {} listeners of {} ({} instances)",
            listeners.len(),
            service_name,
            endpoints.len()
        );
        for listener in listeners {
            listener(service_name, endpoints.clone());
        }
    }
}

#[async_trait]
impl ServiceRegistry for InMemoryRegistry {
    async fn register_instance(&self, service_name: &str, endpoint: &Endpoint) -> Result<()> {
        {
            let mut services = self.services.write();
            let instances = services.entry(service_name.to_string()).or_default();
            if instances.contains(endpoint) {
                debug!("{} already registered at {}", service_name, endpoint);
                return Ok(());
            }
            instances.push(endpoint.clone());
        }

        info!("Registered {} at {}", service_name, endpoint);
        self.notify(service_name);
        Ok(())
    }

    async fn deregister_instance(&self, service_name: &str, endpoint: &Endpoint) -> Result<()> {
        let removed = {
            let mut services = self.services.write();
            match services.get_mut(service_name) {
                Some(instances) => {
                    let before = instances.len();
                    instances.retain(|e| e != endpoint);
                    let removed = instances.len() != before;
                    if instances.is_empty() {
                        services.remove(service_name);
                    }
                    removed
                }
                None => false,
            }
        };

        if removed {
            info!("Deregistered {} at {}", service_name, endpoint);
            self.notify(service_name);
        }
        Ok(())
    }

    async fn get_all_instances(&self, service_name: &str) -> Result<Vec<Endpoint>> {
        Ok(self.snapshot(service_name))
    }

    async fn subscribe(&self, service_name: &str, listener: InstanceListener) -> Result<()> {
        let _delivery = self.delivery.lock();
        self.listeners
            .write()
            .entry(service_name.to_string())
            .or_default()
            .push(Arc::clone(&listener));

        listener(service_name, self.snapshot(service_name));
        Ok(())
    }
}

/// Read-only registry with a fixed instance list per service
#[derive(Debug, Default, Clone)]
pub struct StaticRegistry {
    services: HashMap<String, Vec<Endpoint>>,
}

impl StaticRegistry {
    pub fn new(services: HashMap<String, Vec<Endpoint>>) -> Self {
        Self { services }
    }

    /// Build from the `registry.services` table of the configuration
    pub fn from_config(config: &RegistryConfig) -> Result<Self> {
        let mut services = HashMap::new();
        for (name, addresses) in &config.services {
            let endpoints = addresses
                .iter()
                .map(|address| address.parse::<Endpoint>())
                .collect::<Result<Vec<_>>>()?;
            services.insert(name.clone(), endpoints);
        }
        Ok(Self::new(services))
    }

    pub fn with_service(mut self, service_name: impl Into<String>, endpoints: Vec<Endpoint>) -> Self {
        self.services.insert(service_name.into(), endpoints);
        self
    }
}

#[async_trait]
impl ServiceRegistry for StaticRegistry {
    async fn register_instance(&self, service_name: &str, endpoint: &Endpoint) -> Result<()> {
        warn!("Static registry ignores registration of {} at {}", service_name, endpoint);
        Ok(())
    }

    async fn deregister_instance(&self, service_name: &str, endpoint: &Endpoint) -> Result<()> {
        debug!("Static registry ignores deregistration of {} at {}", service_name, endpoint);
        Ok(())
    }

    async fn get_all_instances(&self, service_name: &str) -> Result<Vec<Endpoint>> {
        Ok(self.services.get(service_name).cloned().unwrap_or_default())
    }

    async fn subscribe(&self, service_name: &str, listener: InstanceListener) -> Result<()> {
        listener(
            service_name,
            self.services.get(service_name).cloned().unwrap_or_default(),
        );
        Ok(())
    }
}

/// Build the registry named by `config.kind`
pub fn registry_from_config(config: &RegistryConfig) -> Result<Arc<dyn ServiceRegistry>> {
    match config.kind.as_str() {
        "memory" => Ok(Arc::new(InMemoryRegistry::new())),
        "static" => Ok(Arc::new(StaticRegistry::from_config(config)?)),
        other => Err(Error::Config(format!("Unknown registry kind: {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording_listener() -> (InstanceListener, Arc<Mutex<Vec<Vec<Endpoint>>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let listener: InstanceListener = Arc::new(move |_name: &str, endpoints: Vec<Endpoint>| {
            sink.lock().push(endpoints);
        });
        (listener, events)
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = InMemoryRegistry::new();
        let endpoint = Endpoint::new("127.0.0.1", 9999);

        registry.register_instance("HelloService", &endpoint).await.unwrap();
        registry.register_instance("HelloService", &endpoint).await.unwrap();

        let instances = registry.get_all_instances("HelloService").await.unwrap();
        assert_eq!(instances, vec![endpoint.clone()]);
        assert!(registry.get_all_instances("EchoService").await.unwrap().is_empty());

        registry.deregister_instance("HelloService", &endpoint).await.unwrap();
        assert!(registry.get_all_instances("HelloService").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_fires_immediately_and_on_change() {
        let registry = InMemoryRegistry::new();
        let first = Endpoint::new("127.0.0.1", 9000);
        let second = Endpoint::new("127.0.0.1", 9001);
        registry.register_instance("HelloService", &first).await.unwrap();

        let (listener, events) = recording_listener();
        registry.subscribe("HelloService", listener).await.unwrap();
        assert_eq!(events.lock().len(), 1);

        registry.register_instance("HelloService", &second).await.unwrap();
        registry.deregister_instance("HelloService", &first).await.unwrap();
        registry.deregister_instance("HelloService", &second).await.unwrap();

        let events = events.lock();
        assert_eq!(events.len(), 4);
        assert_eq!(events[1], vec![first.clone(), second.clone()]);
        assert_eq!(events[2], vec![second]);
        assert!(events[3].is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_last_delivery_matches_registry_under_concurrency() {
        let registry = Arc::new(InMemoryRegistry::new());
        let (listener, events) = recording_listener();
        registry.subscribe("HelloService", listener).await.unwrap();

        let tasks: Vec<_> = (0..50u16)
            .map(|i| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move {
                    registry
                        .register_instance("HelloService", &Endpoint::new("127.0.0.1", 9000 + i))
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let current = registry.get_all_instances("HelloService").await.unwrap();
        assert_eq!(current.len(), 50);
        let events = events.lock();
        assert_eq!(events.len(), 51);
        assert_eq!(events.last().unwrap(), &current);
    }

    #[tokio::test]
    async fn test_static_registry_from_config() {
        let mut config = RegistryConfig::default();
        config.kind = "static".to_string();
        config
            .services
            .insert("HelloService".to_string(), vec!["10.0.0.1:9999".to_string()]);

        let registry = registry_from_config(&config).unwrap();
        let instances = registry.get_all_instances("HelloService").await.unwrap();
        assert_eq!(instances, vec![Endpoint::new("10.0.0.1", 9999)]);

        registry
            .register_instance("HelloService", &Endpoint::new("10.0.0.2", 9999))
            .await
            .unwrap();
        assert_eq!(registry.get_all_instances("HelloService").await.unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_registry_kind() {
        let mut config = RegistryConfig::default();
        config.kind = "zookeeper".to_string();
        assert!(matches!(registry_from_config(&config), Err(Error::Config(_))));
    }
}
