//! Per-endpoint connection cache with revision-based invalidation.
//!
//! Every checked-out instance carries the global revision counter's value
//! at check-out time. Invalidating an endpoint bumps a per-endpoint
//! watermark past every outstanding stamp, so instances that were in
//! flight at invalidation time are destroyed on their way back in rather
//! than being returned to the idle pool.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use wayfinder_common::{Endpoint, OpError, PoolStatistics, ServiceFactory};

use crate::policy::{CachingPolicy, ExhaustionAction};
use crate::sweeper::Sweepable;

/// Poll interval for WAIT-mode check-outs.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Why a check-out could not be satisfied.
#[derive(Debug, Error)]
pub enum CheckOutError {
    /// The endpoint or cache is at capacity and the policy said FAIL, or a
    /// WAIT timed out.
    #[error("cache at capacity; no instance available for check-out")]
    Exhausted,

    /// The cache was already closed.
    #[error("service cache is closed")]
    Closed,

    /// The factory failed to create a fresh instance.
    #[error("failed to create service instance")]
    Create(#[source] OpError),
}

/// A checked-out service instance, stamped with the revision it was
/// checked out under.
pub struct ServiceHandle<S> {
    service: S,
    revision: u64,
}

impl<S> ServiceHandle<S> {
    pub fn service(&self) -> &S {
        &self.service
    }
}

struct IdleEntry<S> {
    handle: ServiceHandle<S>,
    idle_since: Instant,
}

struct EndpointSlot<S> {
    endpoint: Endpoint,
    idle: VecDeque<IdleEntry<S>>,
    active: usize,
}

impl<S> EndpointSlot<S> {
    fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            idle: VecDeque::new(),
            active: 0,
        }
    }

    fn instance_count(&self) -> usize {
        self.active + self.idle.len()
    }
}

enum Plan<S> {
    Reuse(ServiceHandle<S>),
    Create,
    Full,
}

/// Connection cache for one service, shared by all pool call paths.
pub struct ServiceCache<F: ServiceFactory> {
    factory: Arc<F>,
    policy: CachingPolicy,
    slots: DashMap<String, EndpointSlot<F::Service>>,
    invalid_revisions: DashMap<String, u64>,
    revision: AtomicU64,
    total_instances: AtomicUsize,
    closed: AtomicBool,
}

impl<F: ServiceFactory> ServiceCache<F> {
    pub fn new(factory: Arc<F>, policy: CachingPolicy) -> Self {
        Self {
            factory,
            policy,
            slots: DashMap::new(),
            invalid_revisions: DashMap::new(),
            revision: AtomicU64::new(0),
            total_instances: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn policy(&self) -> &CachingPolicy {
        &self.policy
    }

    /// Obtains an instance for `endpoint`, reusing an idle one when
    /// available and creating through the factory otherwise.
    pub async fn check_out(
        &self,
        endpoint: &Endpoint,
    ) -> Result<ServiceHandle<F::Service>, CheckOutError> {
        let deadline = match self.policy.exhaustion_action {
            ExhaustionAction::Wait(timeout) => Some(Instant::now() + timeout),
            _ => None,
        };

        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(CheckOutError::Closed);
            }

            match self.plan_check_out(endpoint) {
                Plan::Reuse(mut handle) => {
                    // Restamp so an instance checked out after an eviction
                    // is never mistaken for one checked out before it.
                    handle.revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
                    return Ok(handle);
                }
                Plan::Create => return self.create_instance(endpoint).await,
                Plan::Full => match self.policy.exhaustion_action {
                    ExhaustionAction::Fail => return Err(CheckOutError::Exhausted),
                    ExhaustionAction::Grow => {
                        self.reserve(endpoint);
                        return self.create_instance(endpoint).await;
                    }
                    ExhaustionAction::Wait(_) => {
                        let deadline = deadline.unwrap_or_else(Instant::now);
                        if Instant::now() >= deadline {
                            return Err(CheckOutError::Exhausted);
                        }
                        tokio::time::sleep(WAIT_POLL_INTERVAL).await;
                    }
                },
            }
        }
    }

    /// Decides what to do for one check-out attempt. Reservation for
    /// `Plan::Create` happens here, under the slot guard, so two racing
    /// check-outs cannot both claim the last capacity slot.
    fn plan_check_out(&self, endpoint: &Endpoint) -> Plan<F::Service> {
        let mut slot = self
            .slots
            .entry(endpoint.id().to_string())
            .or_insert_with(|| EndpointSlot::new(endpoint.clone()));

        if let Some(entry) = slot.idle.pop_front() {
            slot.active += 1;
            return Plan::Reuse(entry.handle);
        }

        let per_cap = self.policy.max_instances_per_endpoint;
        if per_cap != 0 && slot.instance_count() >= per_cap {
            return Plan::Full;
        }

        let total_cap = self.policy.max_total_instances;
        if total_cap != 0 && self.total_instances.load(Ordering::SeqCst) >= total_cap {
            return Plan::Full;
        }

        slot.active += 1;
        self.total_instances.fetch_add(1, Ordering::SeqCst);
        Plan::Create
    }

    fn reserve(&self, endpoint: &Endpoint) {
        let mut slot = self
            .slots
            .entry(endpoint.id().to_string())
            .or_insert_with(|| EndpointSlot::new(endpoint.clone()));
        slot.active += 1;
        self.total_instances.fetch_add(1, Ordering::SeqCst);
    }

    fn unreserve(&self, endpoint: &Endpoint) {
        if let Some(mut slot) = self.slots.get_mut(endpoint.id()) {
            slot.active = slot.active.saturating_sub(1);
        }
        self.total_instances.fetch_sub(1, Ordering::SeqCst);
    }

    /// Creates a fresh instance for an already reserved capacity slot.
    async fn create_instance(
        &self,
        endpoint: &Endpoint,
    ) -> Result<ServiceHandle<F::Service>, CheckOutError> {
        match self.factory.create(endpoint).await {
            Ok(service) => {
                let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(ServiceHandle { service, revision })
            }
            Err(error) => {
                self.unreserve(endpoint);
                Err(CheckOutError::Create(error))
            }
        }
    }

    /// Returns an instance. The instance is destroyed instead of cached
    /// when the cache is closed, idle caching is disabled, the endpoint
    /// was invalidated after this instance's check-out, or keeping it
    /// would leave the cache over capacity.
    pub async fn check_in(&self, endpoint: &Endpoint, handle: ServiceHandle<F::Service>) {
        let to_destroy = {
            let mut slot = self
                .slots
                .entry(endpoint.id().to_string())
                .or_insert_with(|| EndpointSlot::new(endpoint.clone()));
            slot.active = slot.active.saturating_sub(1);

            // The watermark must be read under the slot guard that
            // evict's drain contends on; reading it earlier leaves a
            // window where a concurrent evict drains idle and only then
            // this check-in returns a pre-evict instance to the pool.
            let stale = self
                .invalid_revisions
                .get(endpoint.id())
                .map(|watermark| handle.revision <= *watermark)
                .unwrap_or(false);
            let keep = !self.closed.load(Ordering::SeqCst) && !stale && self.policy.caches();

            let per_cap = self.policy.max_instances_per_endpoint;
            let over_capacity = per_cap != 0 && slot.instance_count() >= per_cap;

            if keep && !over_capacity {
                slot.idle.push_back(IdleEntry {
                    handle,
                    idle_since: Instant::now(),
                });
                None
            } else {
                Some(handle)
            }
        };

        if let Some(handle) = to_destroy {
            self.total_instances.fetch_sub(1, Ordering::SeqCst);
            self.factory.destroy(endpoint, handle.service).await;
        }
    }

    /// Invalidates `endpoint`: clears its idle instances immediately and
    /// ensures every instance checked out before this call is destroyed
    /// at its next check-in.
    pub async fn evict(&self, endpoint: &Endpoint) {
        let watermark = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        self.invalid_revisions
            .insert(endpoint.id().to_string(), watermark);

        let drained = self.drain_idle(endpoint.id());
        if !drained.is_empty() {
            debug!(endpoint = %endpoint, evicted = drained.len(), "evicted idle instances");
        }
        self.destroy_idle(drained).await;
    }

    fn drain_idle(&self, endpoint_id: &str) -> Vec<(Endpoint, IdleEntry<F::Service>)> {
        let mut drained = Vec::new();
        if let Some(mut slot) = self.slots.get_mut(endpoint_id) {
            let endpoint = slot.endpoint.clone();
            while let Some(entry) = slot.idle.pop_front() {
                drained.push((endpoint.clone(), entry));
            }
        }
        drained
    }

    async fn destroy_idle(&self, entries: Vec<(Endpoint, IdleEntry<F::Service>)>) {
        for (endpoint, entry) in entries {
            self.total_instances.fetch_sub(1, Ordering::SeqCst);
            self.factory.destroy(&endpoint, entry.handle.service).await;
        }
    }

    /// Closes the cache: subsequent check-outs fail, subsequent check-ins
    /// destroy, and all idle instances are destroyed now. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut drained = Vec::new();
        for mut slot in self.slots.iter_mut() {
            let endpoint = slot.endpoint.clone();
            while let Some(entry) = slot.idle.pop_front() {
                drained.push((endpoint.clone(), entry));
            }
        }

        debug!(
            service = self.factory.service_name(),
            destroyed = drained.len(),
            "service cache closed"
        );
        self.destroy_idle(drained).await;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl<F: ServiceFactory> PoolStatistics for ServiceCache<F> {
    fn num_idle_instances(&self, endpoint: &Endpoint) -> usize {
        self.slots
            .get(endpoint.id())
            .map(|slot| slot.idle.len())
            .unwrap_or(0)
    }

    fn num_active_instances(&self, endpoint: &Endpoint) -> usize {
        self.slots
            .get(endpoint.id())
            .map(|slot| slot.active)
            .unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl<F: ServiceFactory> Sweepable for ServiceCache<F> {
    /// Destroys idle instances that have exceeded the configured idle
    /// lifetime. Entries are drained oldest-first; the deque is ordered by
    /// check-in time, so the scan stops at the first fresh entry.
    async fn sweep(&self) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }

        let max_idle = self.policy.max_idle_time;
        let mut expired = Vec::new();
        for mut slot in self.slots.iter_mut() {
            let endpoint = slot.endpoint.clone();
            while let Some(entry) = slot.idle.front() {
                if entry.idle_since.elapsed() < max_idle {
                    break;
                }
                if let Some(entry) = slot.idle.pop_front() {
                    expired.push((endpoint.clone(), entry));
                }
            }
        }

        if !expired.is_empty() {
            warn!(
                service = self.factory.service_name(),
                expired = expired.len(),
                "sweeping idle service instances"
            );
        }
        self.destroy_idle(expired).await;
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
