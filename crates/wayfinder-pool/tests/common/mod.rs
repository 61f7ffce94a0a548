#![allow(dead_code)]

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use thiserror::Error;

use wayfinder_common::{CallResult, Endpoint, ServiceCallback, ServiceFactory};

#[derive(Debug, Error)]
#[error("transient failure")]
pub struct TransientError;

#[derive(Debug, Error)]
#[error("fatal failure")]
pub struct FatalError;

/// What one health probe should report.
#[derive(Debug, Clone, Copy)]
pub enum HealthProbe {
    Healthy,
    Unhealthy,
    FailRetriable,
    FailFatal,
}

pub struct MockService {
    pub endpoint_id: String,
    pub serial: usize,
}

/// Factory whose health probes follow a per-endpoint script, falling back
/// to a settable default once the script runs out. Transient errors are
/// retriable, fatal ones are not.
#[derive(Default)]
pub struct MockFactory {
    pub created: AtomicUsize,
    pub destroyed: AtomicUsize,
    pub health_probes: AtomicUsize,
    default_healthy: AtomicBool,
    health_script: DashMap<String, VecDeque<HealthProbe>>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_default_healthy(&self, healthy: bool) {
        self.default_healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn script_health(&self, endpoint: &Endpoint, probes: impl IntoIterator<Item = HealthProbe>) {
        self.health_script
            .entry(endpoint.id().to_string())
            .or_default()
            .extend(probes);
    }

    pub fn remaining_probes(&self, endpoint: &Endpoint) -> usize {
        self.health_script
            .get(endpoint.id())
            .map(|script| script.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl ServiceFactory for MockFactory {
    type Service = MockService;

    fn service_name(&self) -> &str {
        "mock"
    }

    async fn create(&self, endpoint: &Endpoint) -> CallResult<MockService> {
        let serial = self.created.fetch_add(1, Ordering::SeqCst);
        Ok(MockService {
            endpoint_id: endpoint.id().to_string(),
            serial,
        })
    }

    async fn destroy(&self, _endpoint: &Endpoint, _service: MockService) {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
    }

    async fn is_healthy(&self, endpoint: &Endpoint) -> CallResult<bool> {
        self.health_probes.fetch_add(1, Ordering::SeqCst);

        let scripted = self
            .health_script
            .get_mut(endpoint.id())
            .and_then(|mut script| script.pop_front());

        match scripted {
            Some(HealthProbe::Healthy) => Ok(true),
            Some(HealthProbe::Unhealthy) => Ok(false),
            Some(HealthProbe::FailRetriable) => Err(Box::new(TransientError)),
            Some(HealthProbe::FailFatal) => Err(Box::new(FatalError)),
            None => Ok(self.default_healthy.load(Ordering::SeqCst)),
        }
    }

    fn is_retriable(&self, error: &(dyn std::error::Error + Send + Sync + 'static)) -> bool {
        error.downcast_ref::<FatalError>().is_none()
    }
}

/// How one callback invocation should end.
#[derive(Debug, Clone, Copy)]
pub enum CallOutcome {
    Succeed,
    FailTransient,
    FailFatal,
}

/// Callback that follows a global outcome script (then succeeds) and
/// records which endpoint served every invocation. Succeeding calls
/// return the serving endpoint's id.
pub struct ScriptedCallback {
    pub calls: AtomicUsize,
    pub seen: Mutex<Vec<String>>,
    script: Mutex<VecDeque<CallOutcome>>,
    fallback: CallOutcome,
}

impl ScriptedCallback {
    pub fn succeeding() -> Self {
        Self::with_script([])
    }

    pub fn with_script(script: impl IntoIterator<Item = CallOutcome>) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            script: Mutex::new(script.into_iter().collect()),
            fallback: CallOutcome::Succeed,
        }
    }

    pub fn always(outcome: CallOutcome) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            script: Mutex::new(VecDeque::new()),
            fallback: outcome,
        }
    }

    pub fn seen_endpoints(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ServiceCallback<MockService, String> for ScriptedCallback {
    async fn call(&self, service: &MockService) -> CallResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen
            .lock()
            .unwrap()
            .push(service.endpoint_id.clone());

        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.fallback);
        match outcome {
            CallOutcome::Succeed => Ok(service.endpoint_id.clone()),
            CallOutcome::FailTransient => Err(Box::new(TransientError)),
            CallOutcome::FailFatal => Err(Box::new(FatalError)),
        }
    }
}

pub fn endpoints(ids: &[&str]) -> Vec<Endpoint> {
    ids.iter().map(|id| Endpoint::new(*id)).collect()
}

/// Counted retry policy that records how often it was consulted.
pub struct CountingRetry {
    pub consultations: AtomicUsize,
    max_attempts: u32,
}

impl CountingRetry {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            consultations: AtomicUsize::new(0),
            max_attempts,
        }
    }
}

#[async_trait]
impl wayfinder_common::RetryPolicy for CountingRetry {
    async fn allow_retry(&self, attempt: u32, _elapsed: std::time::Duration) -> bool {
        self.consultations.fetch_add(1, Ordering::SeqCst);
        attempt < self.max_attempts
    }
}

/// Round-robin balancer that records how often it was invoked.
#[derive(Default)]
pub struct CountingBalancer {
    pub invocations: AtomicUsize,
    inner: wayfinder_common::balance::RoundRobinBalancer,
}

impl wayfinder_common::LoadBalanceAlgorithm for CountingBalancer {
    fn choose(
        &self,
        candidates: &[Endpoint],
        statistics: &dyn wayfinder_common::PoolStatistics,
    ) -> Option<Endpoint> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        self.inner.choose(candidates, statistics)
    }
}

/// Partition filter that rejects every candidate.
pub struct EmptyFilter;

impl wayfinder_common::PartitionFilter for EmptyFilter {
    fn filter(
        &self,
        _candidates: &[Endpoint],
        _context: &wayfinder_common::PartitionContext,
    ) -> Option<Vec<Endpoint>> {
        None
    }
}
