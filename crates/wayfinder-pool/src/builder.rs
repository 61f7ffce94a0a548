//! Pool assembly.

use std::sync::{Arc, Weak};
use std::time::Duration;

use wayfinder_common::balance::RoundRobinBalancer;
use wayfinder_common::partition::PassThroughFilter;
use wayfinder_common::{HostDiscovery, LoadBalanceAlgorithm, PartitionFilter, ServiceFactory};

use crate::async_pool::AsyncServicePool;
use crate::cache::ServiceCache;
use crate::policy::CachingPolicy;
use crate::pool::ServicePool;
use crate::sweeper::{CacheSweeper, Sweepable};

const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Assembles a [`ServicePool`] from a discovery source and a factory,
/// with defaults for everything else: round-robin balancing, no partition
/// filtering, an unbounded cache with five-minute idle lifetime.
///
/// Must be built inside a tokio runtime; construction spawns the pool's
/// background tasks.
pub struct ServicePoolBuilder<F: ServiceFactory> {
    discovery: Arc<dyn HostDiscovery>,
    factory: Arc<F>,
    caching_policy: CachingPolicy,
    partition_filter: Arc<dyn PartitionFilter>,
    load_balancer: Arc<dyn LoadBalanceAlgorithm>,
    health_check_interval: Duration,
    sweep_interval: Duration,
    shared_sweeper: Option<Arc<CacheSweeper>>,
    shutdown_discovery_on_close: bool,
}

impl<F: ServiceFactory> ServicePoolBuilder<F> {
    pub fn new(discovery: Arc<dyn HostDiscovery>, factory: Arc<F>) -> Self {
        Self {
            discovery,
            factory,
            caching_policy: CachingPolicy::default(),
            partition_filter: Arc::new(PassThroughFilter),
            load_balancer: Arc::new(RoundRobinBalancer::new()),
            health_check_interval: DEFAULT_HEALTH_CHECK_INTERVAL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            shared_sweeper: None,
            shutdown_discovery_on_close: false,
        }
    }

    pub fn with_caching_policy(mut self, policy: CachingPolicy) -> Self {
        self.caching_policy = policy;
        self
    }

    pub fn with_partition_filter(mut self, filter: Arc<dyn PartitionFilter>) -> Self {
        self.partition_filter = filter;
        self
    }

    pub fn with_load_balancer(mut self, balancer: Arc<dyn LoadBalanceAlgorithm>) -> Self {
        self.load_balancer = balancer;
        self
    }

    /// Interval between background re-checks of the bad-endpoint set.
    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    /// Interval for an owned sweeper. Ignored when a shared sweeper is
    /// supplied.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Uses an existing sweeper shared with other pools instead of
    /// spawning one owned by this pool.
    pub fn with_sweeper(mut self, sweeper: Arc<CacheSweeper>) -> Self {
        self.shared_sweeper = Some(sweeper);
        self
    }

    /// Makes [`ServicePool::close`] also close the discovery source.
    pub fn with_shutdown_discovery_on_close(mut self, shutdown: bool) -> Self {
        self.shutdown_discovery_on_close = shutdown;
        self
    }

    pub fn build(self) -> ServicePool<F> {
        let cache = Arc::new(ServiceCache::new(self.factory.clone(), self.caching_policy));

        // A cache whose policy has nothing to sweep never registers.
        let owned_sweeper = if cache.policy().needs_sweeping() {
            let weak = Arc::downgrade(&cache) as Weak<dyn Sweepable>;
            match &self.shared_sweeper {
                Some(sweeper) => {
                    sweeper.register(weak);
                    None
                }
                None => {
                    let sweeper = CacheSweeper::spawn(self.sweep_interval);
                    sweeper.register(weak);
                    Some(sweeper)
                }
            }
        } else {
            None
        };

        ServicePool::from_parts(
            self.factory,
            self.discovery,
            cache,
            self.partition_filter,
            self.load_balancer,
            self.health_check_interval,
            owned_sweeper,
            self.shutdown_discovery_on_close,
        )
    }

    /// Builds the pool and wraps it in an [`AsyncServicePool`] that owns
    /// its shutdown.
    pub fn build_async(self) -> AsyncServicePool<F> {
        AsyncServicePool::new(Arc::new(self.build()), true)
    }
}
