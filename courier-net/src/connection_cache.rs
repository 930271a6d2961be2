//! Reuse of live connections per endpoint

use courier_core::Endpoint;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// A connection handle that can report whether it is still usable
pub trait ActiveConnection: Send + Sync {
    fn is_active(&self) -> bool;
}

/// Map of endpoint to live connection.
///
/// The cache never opens connections itself. Handles observed inactive are
/// evicted on lookup and never returned.
pub struct ConnectionCache<C: ActiveConnection> {
    connections: DashMap<Endpoint, Arc<C>>,
}

impl<C: ActiveConnection> Default for ConnectionCache<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: ActiveConnection> ConnectionCache<C> {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Return the cached connection for `endpoint` if it is still active
    pub fn get(&self, endpoint: &Endpoint) -> Option<Arc<C>> {
        if let Some(connection) = self.connections.get(endpoint) {
            if connection.is_active() {
                return Some(Arc::clone(connection.value()));
            }
        }

        if self
            .connections
            .remove_if(endpoint, |_, connection| !connection.is_active())
            .is_some()
        {
            debug!("Evicted inactive connection to {}", endpoint);
        }
        None
    }

    /// Cache `connection` for `endpoint`, replacing any previous handle
    pub fn set(&self, endpoint: Endpoint, connection: Arc<C>) {
        self.connections.insert(endpoint, connection);
    }

    pub fn remove(&self, endpoint: &Endpoint) -> Option<Arc<C>> {
        self.connections.remove(endpoint).map(|(_, connection)| connection)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Snapshot of every cached handle, active or not
    pub fn connections(&self) -> Vec<Arc<C>> {
        self.connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Drop every handle and return them so the caller can close them
    pub fn drain(&self) -> Vec<Arc<C>> {
        let endpoints: Vec<Endpoint> = self.connections.iter().map(|e| e.key().clone()).collect();
        endpoints
            .iter()
            .filter_map(|endpoint| self.remove(endpoint))
            .collect()
    }
}
