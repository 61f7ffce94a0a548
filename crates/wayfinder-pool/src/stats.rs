//! Read-only statistics view handed to load balancers and embedders.

use std::sync::Arc;

use wayfinder_common::{Endpoint, PoolStatistics};

/// Cheap, cloneable view of the pool's per-endpoint instance counters.
///
/// Backed directly by the live connection cache, so every read reflects
/// the current state rather than a snapshot.
#[derive(Clone)]
pub struct ServicePoolStatistics {
    cache: Arc<dyn PoolStatistics>,
}

impl ServicePoolStatistics {
    pub(crate) fn new(cache: Arc<dyn PoolStatistics>) -> Self {
        Self { cache }
    }
}

impl PoolStatistics for ServicePoolStatistics {
    fn num_idle_instances(&self, endpoint: &Endpoint) -> usize {
        self.cache.num_idle_instances(endpoint)
    }

    fn num_active_instances(&self, endpoint: &Endpoint) -> usize {
        self.cache.num_active_instances(endpoint)
    }
}
