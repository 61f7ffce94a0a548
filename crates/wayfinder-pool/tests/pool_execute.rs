mod common;

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use wayfinder_common::retry::NeverRetry;
use wayfinder_common::{
    CallResult, Endpoint, PartitionContext, PartitionFilter, ServiceCallback, WayfinderError,
};
use wayfinder_discovery::FixedHostDiscovery;
use wayfinder_pool::{ServicePoolBuilder, ServicePoolStatistics};

use common::{
    endpoints, CallOutcome, CountingBalancer, CountingRetry, EmptyFilter, FatalError, MockFactory,
    MockService, ScriptedCallback, TransientError,
};

#[tokio::test]
async fn test_empty_discovery_fails_with_no_available_hosts() {
    let discovery = Arc::new(FixedHostDiscovery::new());
    let factory = Arc::new(MockFactory::new());
    let pool = ServicePoolBuilder::new(discovery, factory).build();

    let result = pool
        .execute(
            Arc::new(NeverRetry),
            Arc::new(ScriptedCallback::succeeding()),
        )
        .await;
    assert!(matches!(result, Err(WayfinderError::NoAvailableHosts)));
}

#[tokio::test]
async fn test_empty_filter_fails_without_consulting_balancer() {
    let discovery = Arc::new(FixedHostDiscovery::with_endpoints(endpoints(&["a", "b"])));
    let factory = Arc::new(MockFactory::new());
    let balancer = Arc::new(CountingBalancer::default());
    let pool = ServicePoolBuilder::new(discovery, factory)
        .with_partition_filter(Arc::new(EmptyFilter))
        .with_load_balancer(balancer.clone())
        .build();

    let result = pool
        .execute(
            Arc::new(NeverRetry),
            Arc::new(ScriptedCallback::succeeding()),
        )
        .await;

    assert!(matches!(result, Err(WayfinderError::NoSuitableHosts)));
    assert_eq!(balancer.invocations.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_success_never_consults_retry_policy() {
    let discovery = Arc::new(FixedHostDiscovery::with_endpoints(endpoints(&["a"])));
    let factory = Arc::new(MockFactory::new());
    let pool = ServicePoolBuilder::new(discovery, factory).build();

    let retry = Arc::new(CountingRetry::new(3));
    let result = pool
        .execute(retry.clone(), Arc::new(ScriptedCallback::succeeding()))
        .await
        .unwrap();

    assert_eq!(result, "a");
    assert_eq!(retry.consultations.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_non_retriable_failure_propagates_without_marking_bad() {
    let discovery = Arc::new(FixedHostDiscovery::with_endpoints(endpoints(&["a", "b"])));
    let factory = Arc::new(MockFactory::new());
    let pool = ServicePoolBuilder::new(discovery, factory).build();

    let retry = Arc::new(CountingRetry::new(3));
    let callback = Arc::new(ScriptedCallback::always(CallOutcome::FailFatal));
    let result = pool.execute(retry.clone(), callback.clone()).await;

    match result {
        Err(WayfinderError::OperationFailed { source }) => {
            assert!(source.downcast_ref::<FatalError>().is_some());
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(callback.calls.load(Ordering::SeqCst), 1);
    assert_eq!(retry.consultations.load(Ordering::SeqCst), 0);
    assert_eq!(pool.num_bad_endpoints(), 0);
}

#[tokio::test]
async fn test_retries_hit_distinct_endpoints_then_max_retries() {
    let discovery = Arc::new(FixedHostDiscovery::with_endpoints(endpoints(&[
        "a", "b", "c", "d",
    ])));
    let factory = Arc::new(MockFactory::new());
    let pool = ServicePoolBuilder::new(discovery, factory).build();

    let callback = Arc::new(ScriptedCallback::always(CallOutcome::FailTransient));
    let result = pool
        .execute(Arc::new(CountingRetry::new(3)), callback.clone())
        .await;

    match result {
        Err(WayfinderError::MaxRetries { source }) => {
            assert!(source.downcast_ref::<TransientError>().is_some());
        }
        other => panic!("unexpected result: {other:?}"),
    }

    let seen = callback.seen_endpoints();
    assert_eq!(seen.len(), 3);
    let distinct: std::collections::HashSet<_> = seen.iter().collect();
    assert_eq!(distinct.len(), 3, "each attempt should pick a fresh endpoint");
    assert_eq!(pool.num_bad_endpoints(), 3);
    assert_eq!(pool.num_valid_endpoints(), 1);
}

#[tokio::test]
async fn test_exhausting_every_endpoint_yields_only_bad_hosts() {
    let discovery = Arc::new(FixedHostDiscovery::with_endpoints(endpoints(&["a", "b", "c"])));
    let factory = Arc::new(MockFactory::new());
    let pool = ServicePoolBuilder::new(discovery, factory).build();

    let callback = Arc::new(ScriptedCallback::always(CallOutcome::FailTransient));

    for expected_bad in 1..=2 {
        let result = pool.execute(Arc::new(NeverRetry), callback.clone()).await;
        assert!(matches!(result, Err(WayfinderError::MaxRetries { .. })));
        assert_eq!(pool.num_bad_endpoints(), expected_bad);
    }

    // The last valid endpoint fails too, so the decline sees an all-bad set.
    let result = pool.execute(Arc::new(NeverRetry), callback.clone()).await;
    match result {
        Err(WayfinderError::OnlyBadHosts { source }) => {
            assert!(source.unwrap().downcast_ref::<TransientError>().is_some());
        }
        other => panic!("unexpected result: {other:?}"),
    }

    // A further call fails at selection time, with no attempt made.
    let calls_before = callback.calls.load(Ordering::SeqCst);
    let result = pool.execute(Arc::new(NeverRetry), callback.clone()).await;
    match result {
        Err(WayfinderError::OnlyBadHosts { source }) => assert!(source.is_none()),
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(callback.calls.load(Ordering::SeqCst), calls_before);
}

#[tokio::test(start_paused = true)]
async fn test_periodic_rescan_restores_bad_endpoint() {
    let discovery = Arc::new(FixedHostDiscovery::with_endpoints(endpoints(&["a"])));
    let factory = Arc::new(MockFactory::new());
    let pool = ServicePoolBuilder::new(discovery, factory.clone())
        .with_health_check_interval(Duration::from_secs(60))
        .build();

    let callback = Arc::new(ScriptedCallback::with_script([CallOutcome::FailTransient]));
    let result = pool.execute(Arc::new(NeverRetry), callback.clone()).await;
    assert!(matches!(result, Err(WayfinderError::OnlyBadHosts { .. })));
    assert_eq!(pool.num_bad_endpoints(), 1);

    let result = pool.execute(Arc::new(NeverRetry), callback.clone()).await;
    assert!(matches!(result, Err(WayfinderError::OnlyBadHosts { source: None })));

    factory.set_default_healthy(true);
    tokio::time::sleep(Duration::from_secs(61)).await;

    assert_eq!(pool.num_bad_endpoints(), 0);
    let result = pool.execute(Arc::new(NeverRetry), callback).await.unwrap();
    assert_eq!(result, "a");
}

#[tokio::test(start_paused = true)]
async fn test_inline_health_check_can_restore_endpoint() {
    let discovery = Arc::new(FixedHostDiscovery::with_endpoints(endpoints(&["a"])));
    let factory = Arc::new(MockFactory::new());
    let endpoint = Endpoint::new("a");
    factory.script_health(&endpoint, [common::HealthProbe::Healthy]);

    let pool = ServicePoolBuilder::new(discovery, factory)
        .with_health_check_interval(Duration::from_secs(3600))
        .build();

    let callback = Arc::new(ScriptedCallback::with_script([CallOutcome::FailTransient]));
    let result = pool.execute(Arc::new(NeverRetry), callback.clone()).await;
    assert!(matches!(result, Err(WayfinderError::OnlyBadHosts { .. })));

    // The fire-and-forget check submitted at mark-bad time finds the
    // endpoint healthy and restores it.
    let mut restored = false;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(1)).await;
        if pool.num_bad_endpoints() == 0 {
            restored = true;
            break;
        }
    }
    assert!(restored, "endpoint was never restored");

    let result = pool.execute(Arc::new(NeverRetry), callback).await.unwrap();
    assert_eq!(result, "a");
}

struct StatsProbe {
    stats: ServicePoolStatistics,
    observed_active: AtomicUsize,
}

#[async_trait]
impl ServiceCallback<MockService, ()> for StatsProbe {
    async fn call(&self, service: &MockService) -> CallResult<()> {
        let endpoint = Endpoint::new(service.endpoint_id.clone());
        self.observed_active.store(
            wayfinder_common::PoolStatistics::num_active_instances(&self.stats, &endpoint),
            Ordering::SeqCst,
        );
        Ok(())
    }
}

#[tokio::test]
async fn test_active_count_is_one_inside_running_operation() {
    use wayfinder_common::PoolStatistics;

    let discovery = Arc::new(FixedHostDiscovery::with_endpoints(endpoints(&["a"])));
    let factory = Arc::new(MockFactory::new());
    let pool = ServicePoolBuilder::new(discovery, factory).build();

    let endpoint = Endpoint::new("a");
    let stats = pool.statistics();
    assert_eq!(stats.num_active_instances(&endpoint), 0);

    let probe = Arc::new(StatsProbe {
        stats: pool.statistics(),
        observed_active: AtomicUsize::new(0),
    });
    pool.execute(Arc::new(NeverRetry), probe.clone()).await.unwrap();

    assert_eq!(probe.observed_active.load(Ordering::SeqCst), 1);
    assert_eq!(stats.num_active_instances(&endpoint), 0);
    assert_eq!(stats.num_idle_instances(&endpoint), 1);
}

struct PartitionByIdFilter;

impl PartitionFilter for PartitionByIdFilter {
    fn filter(&self, candidates: &[Endpoint], context: &PartitionContext) -> Option<Vec<Endpoint>> {
        match context.get_default() {
            Some(id) => Some(
                candidates
                    .iter()
                    .filter(|endpoint| endpoint.id() == id)
                    .cloned()
                    .collect(),
            ),
            None => Some(candidates.to_vec()),
        }
    }
}

#[tokio::test]
async fn test_partition_context_routes_to_matching_endpoint() {
    let discovery = Arc::new(FixedHostDiscovery::with_endpoints(endpoints(&["a", "b", "c"])));
    let factory = Arc::new(MockFactory::new());
    let pool = ServicePoolBuilder::new(discovery, factory)
        .with_partition_filter(Arc::new(PartitionByIdFilter))
        .build();

    for _ in 0..3 {
        let result = pool
            .execute_with_partition(
                PartitionContext::of("b"),
                Arc::new(NeverRetry),
                Arc::new(ScriptedCallback::succeeding()),
            )
            .await
            .unwrap();
        assert_eq!(result, "b");
    }

    let result = pool
        .execute_with_partition(
            PartitionContext::of("nowhere"),
            Arc::new(NeverRetry),
            Arc::new(ScriptedCallback::succeeding()),
        )
        .await;
    assert!(matches!(result, Err(WayfinderError::NoSuitableHosts)));
}

#[tokio::test(start_paused = true)]
async fn test_default_policy_sweeps_idle_instances_past_their_lifetime() {
    use wayfinder_common::PoolStatistics;

    let discovery = Arc::new(FixedHostDiscovery::with_endpoints(endpoints(&["a"])));
    let factory = Arc::new(MockFactory::new());
    let pool = ServicePoolBuilder::new(discovery, factory.clone())
        .with_sweep_interval(Duration::from_secs(60))
        .build();

    pool.execute(
        Arc::new(NeverRetry),
        Arc::new(ScriptedCallback::succeeding()),
    )
    .await
    .unwrap();

    let endpoint = Endpoint::new("a");
    let stats = pool.statistics();
    assert_eq!(stats.num_idle_instances(&endpoint), 1);

    // Default idle lifetime is five minutes; an hour covers many sweeps.
    tokio::time::sleep(Duration::from_secs(3600)).await;

    assert_eq!(stats.num_idle_instances(&endpoint), 0);
    assert_eq!(factory.destroyed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_close_is_idempotent_and_rejects_further_calls() {
    let discovery = Arc::new(FixedHostDiscovery::with_endpoints(endpoints(&["a"])));
    let factory = Arc::new(MockFactory::new());
    let pool = ServicePoolBuilder::new(discovery, factory.clone()).build();

    let callback = Arc::new(ScriptedCallback::succeeding());
    pool.execute(Arc::new(NeverRetry), callback.clone()).await.unwrap();

    pool.close().await;
    pool.close().await;

    assert!(pool.is_closed());
    assert_eq!(factory.destroyed.load(Ordering::SeqCst), 1);

    let result = pool.execute(Arc::new(NeverRetry), callback).await;
    assert!(matches!(result, Err(WayfinderError::PoolClosed)));
}

struct BlockingCallback {
    started: tokio::sync::Notify,
    release: tokio::sync::Notify,
}

#[async_trait]
impl ServiceCallback<MockService, ()> for BlockingCallback {
    async fn call(&self, _service: &MockService) -> CallResult<()> {
        self.started.notify_one();
        self.release.notified().await;
        Ok(())
    }
}

#[tokio::test]
async fn test_endpoint_removal_during_in_flight_call() {
    let discovery = Arc::new(FixedHostDiscovery::with_endpoints(endpoints(&["a"])));
    let factory = Arc::new(MockFactory::new());
    let pool = Arc::new(ServicePoolBuilder::new(discovery.clone(), factory).build());

    let callback = Arc::new(BlockingCallback {
        started: tokio::sync::Notify::new(),
        release: tokio::sync::Notify::new(),
    });

    let in_flight = {
        let pool = pool.clone();
        let callback = callback.clone();
        tokio::spawn(async move { pool.execute(Arc::new(NeverRetry), callback).await })
    };

    callback.started.notified().await;
    discovery.remove(&Endpoint::new("a")).await;

    callback.release.notify_one();
    in_flight.await.unwrap().unwrap();

    assert!(pool.bad_endpoints().is_empty());
    assert!(pool.all_endpoints().is_empty());
}
