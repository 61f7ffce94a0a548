//! The service pool orchestrator.
//!
//! One `execute` call walks select, acquire, invoke, and classify: pick a
//! non-bad endpoint through the partition filter and load balancer, check
//! out a cached instance, run the caller's operation, and on a retriable
//! failure mark the endpoint bad and ask the retry policy for another
//! attempt. Endpoint health state lives here; instance lifecycle lives in
//! the [`ServiceCache`](crate::cache::ServiceCache).

use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use wayfinder_common::{
    CallResult, Endpoint, EndpointListener, HostDiscovery, LoadBalanceAlgorithm, OpError,
    PartitionContext, PartitionFilter, PoolStatistics, Result, RetryPolicy, ServiceCallback,
    ServiceFactory, WayfinderError,
};

use crate::cache::{CheckOutError, ServiceCache};
use crate::health::HealthCheckResults;
use crate::stats::ServicePoolStatistics;
use crate::sweeper::CacheSweeper;

/// Everything shared between the pool, its background tasks, and spawned
/// health checks.
pub(crate) struct PoolInner<F: ServiceFactory> {
    pub(crate) factory: Arc<F>,
    pub(crate) discovery: Arc<dyn HostDiscovery>,
    pub(crate) cache: Arc<ServiceCache<F>>,
    pub(crate) bad: Arc<DashMap<String, Endpoint>>,
    filter: Arc<dyn PartitionFilter>,
    balancer: Arc<dyn LoadBalanceAlgorithm>,
    health_checks: tokio::sync::Mutex<JoinSet<()>>,
    closed: AtomicBool,
}

/// Smart client for one remote service.
///
/// Built through [`ServicePoolBuilder`](crate::builder::ServicePoolBuilder).
/// Cheap to share behind an `Arc`; all methods take `&self`.
pub struct ServicePool<F: ServiceFactory> {
    inner: Arc<PoolInner<F>>,
    rescan: JoinHandle<()>,
    owned_sweeper: Option<CacheSweeper>,
    shutdown_discovery_on_close: bool,
}

impl<F: ServiceFactory> ServicePool<F> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        factory: Arc<F>,
        discovery: Arc<dyn HostDiscovery>,
        cache: Arc<ServiceCache<F>>,
        filter: Arc<dyn PartitionFilter>,
        balancer: Arc<dyn LoadBalanceAlgorithm>,
        health_check_interval: Duration,
        owned_sweeper: Option<CacheSweeper>,
        shutdown_discovery_on_close: bool,
    ) -> Self {
        let bad = Arc::new(DashMap::new());

        let inner = Arc::new(PoolInner {
            factory,
            discovery: discovery.clone(),
            cache: cache.clone(),
            bad: bad.clone(),
            filter,
            balancer,
            health_checks: tokio::sync::Mutex::new(JoinSet::new()),
            closed: AtomicBool::new(false),
        });

        discovery.add_listener(Arc::new(PoolEndpointListener { bad, cache }));

        let rescan = {
            let inner = inner.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval_at(
                    Instant::now() + health_check_interval,
                    health_check_interval,
                );
                loop {
                    ticker.tick().await;
                    inner.rescan_bad_endpoints().await;
                }
            })
        };

        Self {
            inner,
            rescan,
            owned_sweeper,
            shutdown_discovery_on_close,
        }
    }

    /// Runs `callback` against some healthy endpoint, retrying per `retry`.
    pub async fn execute<R>(
        &self,
        retry: Arc<dyn RetryPolicy>,
        callback: Arc<dyn ServiceCallback<F::Service, R>>,
    ) -> Result<R>
    where
        R: Send,
    {
        self.execute_with_partition(PartitionContext::empty(), retry, callback)
            .await
    }

    /// Like [`ServicePool::execute`], with routing hints for the partition
    /// filter.
    pub async fn execute_with_partition<R>(
        &self,
        context: PartitionContext,
        retry: Arc<dyn RetryPolicy>,
        callback: Arc<dyn ServiceCallback<F::Service, R>>,
    ) -> Result<R>
    where
        R: Send,
    {
        self.inner
            .execute_with_partition(context, retry, callback)
            .await
    }

    /// Runs `callback` against one specific endpoint, bypassing partition
    /// filtering and load balancing. Retries stay on the same endpoint;
    /// exhaustion fails with [`WayfinderError::MaxRetries`].
    pub async fn execute_on_endpoint<R>(
        &self,
        endpoint: &Endpoint,
        retry: Arc<dyn RetryPolicy>,
        callback: Arc<dyn ServiceCallback<F::Service, R>>,
    ) -> Result<R>
    where
        R: Send,
    {
        self.inner
            .execute_on_endpoint(endpoint, retry, callback)
            .await
    }

    /// Probes one endpoint. Probe errors are swallowed and count as
    /// unhealthy; this never fails.
    pub async fn check_health(&self, endpoint: &Endpoint) -> bool {
        self.inner.check_health(endpoint).await
    }

    /// Probes the discovered endpoint set, stopping at the first healthy
    /// endpoint. Endpoints found unhealthy are marked bad as a side effect.
    pub async fn scan_until_healthy(&self) -> HealthCheckResults {
        self.inner.scan_until_healthy().await
    }

    pub fn all_endpoints(&self) -> Vec<Endpoint> {
        self.inner.discovery.endpoints()
    }

    pub fn bad_endpoints(&self) -> Vec<Endpoint> {
        self.inner
            .bad
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn num_valid_endpoints(&self) -> usize {
        self.inner
            .discovery
            .endpoints()
            .iter()
            .filter(|endpoint| !self.inner.bad.contains_key(endpoint.id()))
            .count()
    }

    pub fn num_bad_endpoints(&self) -> usize {
        self.inner.bad.len()
    }

    pub fn statistics(&self) -> ServicePoolStatistics {
        ServicePoolStatistics::new(self.inner.cache.clone() as Arc<dyn PoolStatistics>)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Shuts the pool down: stops background work, interrupts in-flight
    /// health checks, and closes the cache. Idempotent.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.rescan.abort();
        self.inner.health_checks.lock().await.abort_all();
        self.inner.cache.close().await;

        if let Some(sweeper) = &self.owned_sweeper {
            sweeper.shutdown();
        }
        if self.shutdown_discovery_on_close {
            self.inner.discovery.close();
        }

        info!(
            service = self.inner.factory.service_name(),
            "service pool closed"
        );
    }
}

impl<F: ServiceFactory> Drop for ServicePool<F> {
    fn drop(&mut self) {
        self.rescan.abort();
    }
}

impl<F: ServiceFactory> PoolInner<F> {
    async fn execute_with_partition<R>(
        self: &Arc<Self>,
        context: PartitionContext,
        retry: Arc<dyn RetryPolicy>,
        callback: Arc<dyn ServiceCallback<F::Service, R>>,
    ) -> Result<R>
    where
        R: Send,
    {
        if self.closed.load(Ordering::SeqCst) {
            return Err(WayfinderError::PoolClosed);
        }

        let started = Instant::now();
        let mut attempt: u32 = 0;
        let mut last_error: Option<OpError> = None;

        loop {
            let endpoint = self.select(&context, &mut last_error)?;
            debug!(endpoint = %endpoint, attempt, "selected endpoint");

            match self.invoke_once(&endpoint, callback.as_ref()).await? {
                Ok(result) => return Ok(result),
                Err(error) => {
                    if !self.factory.is_retriable(error.as_ref()) {
                        return Err(WayfinderError::OperationFailed { source: error });
                    }

                    info!(endpoint = %endpoint, %error, "retriable failure; endpoint marked bad");
                    self.mark_bad(&endpoint).await;

                    attempt += 1;
                    if retry.allow_retry(attempt, started.elapsed()).await {
                        last_error = Some(error);
                        continue;
                    }

                    return Err(if self.has_valid_endpoints() {
                        WayfinderError::MaxRetries { source: error }
                    } else {
                        WayfinderError::OnlyBadHosts {
                            source: Some(error),
                        }
                    });
                }
            }
        }
    }

    async fn execute_on_endpoint<R>(
        self: &Arc<Self>,
        endpoint: &Endpoint,
        retry: Arc<dyn RetryPolicy>,
        callback: Arc<dyn ServiceCallback<F::Service, R>>,
    ) -> Result<R>
    where
        R: Send,
    {
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(WayfinderError::PoolClosed);
            }

            match self.invoke_once(endpoint, callback.as_ref()).await? {
                Ok(result) => return Ok(result),
                Err(error) => {
                    if !self.factory.is_retriable(error.as_ref()) {
                        return Err(WayfinderError::OperationFailed { source: error });
                    }

                    info!(endpoint = %endpoint, %error, "retriable failure on fixed endpoint");
                    self.mark_bad(endpoint).await;

                    attempt += 1;
                    if !retry.allow_retry(attempt, started.elapsed()).await {
                        return Err(WayfinderError::MaxRetries { source: error });
                    }
                }
            }
        }
    }

    /// Picks an endpoint for one attempt. Takes the last failure by `&mut`
    /// so an all-bad outcome can carry the error that exhausted the final
    /// endpoint.
    fn select(
        &self,
        context: &PartitionContext,
        last_error: &mut Option<OpError>,
    ) -> Result<Endpoint> {
        let all = self.discovery.endpoints();
        if all.is_empty() {
            return Err(WayfinderError::NoAvailableHosts);
        }

        let good: Vec<Endpoint> = all
            .into_iter()
            .filter(|endpoint| !self.bad.contains_key(endpoint.id()))
            .collect();
        if good.is_empty() {
            return Err(WayfinderError::OnlyBadHosts {
                source: last_error.take(),
            });
        }

        let candidates = match self.filter.filter(&good, context) {
            Some(candidates) if !candidates.is_empty() => candidates,
            _ => return Err(WayfinderError::NoSuitableHosts),
        };

        self.balancer
            .choose(&candidates, self.cache.as_ref())
            .ok_or(WayfinderError::NoSuitableHosts)
    }

    /// One acquire/invoke/release cycle. The instance is always checked
    /// back in, success or failure. Cache exhaustion propagates as a pool
    /// error; factory create failures are surfaced as operation failures
    /// so they go through the normal retriable classification.
    async fn invoke_once<R>(
        &self,
        endpoint: &Endpoint,
        callback: &dyn ServiceCallback<F::Service, R>,
    ) -> Result<CallResult<R>>
    where
        R: Send,
    {
        match self.cache.check_out(endpoint).await {
            Ok(handle) => {
                let outcome = callback.call(handle.service()).await;
                self.cache.check_in(endpoint, handle).await;
                Ok(outcome)
            }
            Err(CheckOutError::Exhausted) => Err(WayfinderError::NoCachedInstancesAvailable),
            Err(CheckOutError::Closed) => Err(WayfinderError::PoolClosed),
            Err(CheckOutError::Create(error)) => Ok(Err(error)),
        }
    }

    fn has_valid_endpoints(&self) -> bool {
        self.discovery
            .endpoints()
            .iter()
            .any(|endpoint| !self.bad.contains_key(endpoint.id()))
    }

    /// Marks an endpoint bad, evicts its cached instances, and submits a
    /// fire-and-forget health check that can restore it. Endpoints no
    /// longer known to discovery are not tracked.
    async fn mark_bad(self: &Arc<Self>, endpoint: &Endpoint) {
        let known = self
            .discovery
            .endpoints()
            .iter()
            .any(|known| known.id() == endpoint.id());
        if !known {
            debug!(endpoint = %endpoint, "failed endpoint already left discovery");
            return;
        }

        let newly_bad = self
            .bad
            .insert(endpoint.id().to_string(), endpoint.clone())
            .is_none();
        self.cache.evict(endpoint).await;

        if newly_bad {
            warn!(endpoint = %endpoint, "endpoint marked bad");
        }
        self.submit_health_check(endpoint.clone()).await;
    }

    fn restore(&self, endpoint: &Endpoint) {
        if self.bad.remove(endpoint.id()).is_some() {
            info!(endpoint = %endpoint, "endpoint restored to service");
        }
    }

    async fn submit_health_check(self: &Arc<Self>, endpoint: Endpoint) {
        let mut checks = self.health_checks.lock().await;
        while checks.try_join_next().is_some() {}

        let inner = self.clone();
        checks.spawn(async move {
            if inner.check_health(&endpoint).await {
                inner.restore(&endpoint);
            }
        });
    }

    async fn check_health(&self, endpoint: &Endpoint) -> bool {
        match self.factory.is_healthy(endpoint).await {
            Ok(healthy) => healthy,
            Err(error) => {
                debug!(endpoint = %endpoint, %error, "health probe failed");
                false
            }
        }
    }

    /// Probes an endpoint, retrying once when the probe itself fails with
    /// a retriable error.
    async fn probe(&self, endpoint: &Endpoint) -> bool {
        match self.factory.is_healthy(endpoint).await {
            Ok(healthy) => healthy,
            Err(error) => {
                if self.factory.is_retriable(error.as_ref()) {
                    debug!(endpoint = %endpoint, %error, "probe failed; retrying once");
                    self.check_health(endpoint).await
                } else {
                    debug!(endpoint = %endpoint, %error, "probe failed");
                    false
                }
            }
        }
    }

    async fn scan_until_healthy(self: &Arc<Self>) -> HealthCheckResults {
        let mut results = HealthCheckResults::default();

        for endpoint in self.discovery.endpoints() {
            if self.probe(&endpoint).await {
                results.record_healthy(endpoint);
                return results;
            }

            self.mark_bad_quietly(&endpoint).await;
            results.record_unhealthy(endpoint);
        }
        results
    }

    /// Bad-set insertion without the follow-up health check, used by scan
    /// paths that just probed the endpoint themselves.
    async fn mark_bad_quietly(&self, endpoint: &Endpoint) {
        let known = self
            .discovery
            .endpoints()
            .iter()
            .any(|known| known.id() == endpoint.id());
        if !known {
            return;
        }

        self.bad
            .insert(endpoint.id().to_string(), endpoint.clone());
        self.cache.evict(endpoint).await;
    }

    async fn rescan_bad_endpoints(&self) {
        let bad: Vec<Endpoint> = self.bad.iter().map(|entry| entry.value().clone()).collect();
        if bad.is_empty() {
            return;
        }

        let known: HashSet<String> = self
            .discovery
            .endpoints()
            .into_iter()
            .map(|endpoint| endpoint.id().to_string())
            .collect();

        debug!(count = bad.len(), "re-checking bad endpoints");
        for endpoint in bad {
            if !known.contains(endpoint.id()) {
                continue;
            }
            if self.check_health(&endpoint).await {
                self.restore(&endpoint);
            }
        }
    }
}

/// Keeps the bad-set and cache consistent with discovery membership. Holds
/// only the shared maps, never the pool itself.
struct PoolEndpointListener<F: ServiceFactory> {
    bad: Arc<DashMap<String, Endpoint>>,
    cache: Arc<ServiceCache<F>>,
}

#[async_trait::async_trait]
impl<F: ServiceFactory> EndpointListener for PoolEndpointListener<F> {
    async fn on_endpoint_added(&self, endpoint: &Endpoint) {
        // New registrations always start valid.
        self.bad.remove(endpoint.id());
    }

    async fn on_endpoint_removed(&self, endpoint: &Endpoint) {
        self.bad.remove(endpoint.id());
        self.cache.evict(endpoint).await;
        debug!(endpoint = %endpoint, "removed endpoint; cached instances evicted");
    }
}
