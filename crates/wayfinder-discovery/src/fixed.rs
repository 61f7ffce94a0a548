//! In-process host discovery backed by an explicit endpoint set.
//!
//! Useful for tests, for static deployments where the endpoint list comes
//! from configuration, and as the substrate a registry watcher writes into.

use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

use wayfinder_common::{Endpoint, EndpointListener, HostDiscovery};

/// A [`HostDiscovery`] whose membership is mutated directly by the embedder.
///
/// `add` and `remove` are async because they notify registered listeners
/// in-line; the listener set is copied out of the lock first so callbacks
/// never run while it is held.
pub struct FixedHostDiscovery {
    endpoints: DashMap<String, Endpoint>,
    listeners: Mutex<Vec<Arc<dyn EndpointListener>>>,
    closed: AtomicBool,
}

impl FixedHostDiscovery {
    pub fn new() -> Self {
        Self {
            endpoints: DashMap::new(),
            listeners: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Creates a discovery pre-seeded with `endpoints`. No notifications
    /// fire for the seed set.
    pub fn with_endpoints(endpoints: impl IntoIterator<Item = Endpoint>) -> Self {
        let discovery = Self::new();
        for endpoint in endpoints {
            discovery
                .endpoints
                .insert(endpoint.id().to_string(), endpoint);
        }
        discovery
    }

    fn listeners_snapshot(&self) -> Vec<Arc<dyn EndpointListener>> {
        match self.listeners.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Registers `endpoint` and notifies listeners.
    ///
    /// Re-adding an already present id replaces the stored payload without
    /// notifying.
    pub async fn add(&self, endpoint: Endpoint) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }

        let is_new = self
            .endpoints
            .insert(endpoint.id().to_string(), endpoint.clone())
            .is_none();
        if !is_new {
            return;
        }

        debug!(endpoint = %endpoint, "endpoint registered");
        for listener in self.listeners_snapshot() {
            listener.on_endpoint_added(&endpoint).await;
        }
    }

    /// Deregisters `endpoint` and notifies listeners. Removing an unknown
    /// id is a no-op.
    pub async fn remove(&self, endpoint: &Endpoint) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }

        if self.endpoints.remove(endpoint.id()).is_none() {
            return;
        }

        debug!(endpoint = %endpoint, "endpoint deregistered");
        for listener in self.listeners_snapshot() {
            listener.on_endpoint_removed(endpoint).await;
        }
    }

    pub fn contains(&self, endpoint: &Endpoint) -> bool {
        self.endpoints.contains_key(endpoint.id())
    }
}

impl Default for FixedHostDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

impl HostDiscovery for FixedHostDiscovery {
    fn endpoints(&self) -> Vec<Endpoint> {
        self.endpoints
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    fn add_listener(&self, listener: Arc<dyn EndpointListener>) {
        match self.listeners.lock() {
            Ok(mut guard) => guard.push(listener),
            Err(poisoned) => poisoned.into_inner().push(listener),
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        match self.listeners.lock() {
            Ok(mut guard) => guard.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }
}
