//! The pluggable trait seams the service pool is assembled from.
//!
//! Each trait captures exactly one concern and is injected at construction
//! time; the pool never subclasses or reaches around these contracts.

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;

use crate::endpoint::Endpoint;
use crate::error::OpError;
use crate::partition::PartitionContext;

/// Result of one invocation of a caller-supplied operation.
pub type CallResult<R> = std::result::Result<R, OpError>;

/// Creates, probes, and tears down service handles for endpoints, and
/// classifies operation failures.
///
/// The service handle is opaque to the pool: it is whatever the embedder
/// needs to talk to one concrete instance (an HTTP client bound to a base
/// URL, a connected stream, a generated RPC stub, ...).
#[async_trait]
pub trait ServiceFactory: Send + Sync + 'static {
    /// The per-endpoint service handle this factory produces.
    type Service: Send + Sync + 'static;

    /// Name of the remote service, used for log scoping only.
    fn service_name(&self) -> &str;

    /// Establishes a new service handle for `endpoint`.
    async fn create(&self, endpoint: &Endpoint) -> CallResult<Self::Service>;

    /// Tears down a service handle that is leaving the cache.
    async fn destroy(&self, endpoint: &Endpoint, service: Self::Service);

    /// Probes whether `endpoint` is currently usable.
    ///
    /// May fail; callers in the pool treat a probe failure as "unhealthy"
    /// and never propagate it.
    async fn is_healthy(&self, endpoint: &Endpoint) -> CallResult<bool>;

    /// Classifies a failure raised by an operation (or by `create`).
    ///
    /// Retriable failures mark the endpoint bad and may trigger another
    /// attempt elsewhere; non-retriable failures propagate to the caller
    /// unchanged.
    fn is_retriable(&self, error: &(dyn std::error::Error + Send + Sync + 'static)) -> bool;
}

/// Receives push notifications when the discovered endpoint set changes.
///
/// Listener callbacks may run concurrently with in-flight `execute` calls
/// and must therefore be cheap and non-blocking apart from their own
/// bookkeeping.
#[async_trait]
pub trait EndpointListener: Send + Sync {
    async fn on_endpoint_added(&self, endpoint: &Endpoint);
    async fn on_endpoint_removed(&self, endpoint: &Endpoint);
}

/// Read-only view of the currently discovered endpoint set.
///
/// The pool only ever reads this view; it mutates nothing and reacts to
/// removals by evicting its own derived state.
pub trait HostDiscovery: Send + Sync {
    /// Snapshot of every currently registered endpoint.
    fn endpoints(&self) -> Vec<Endpoint>;

    /// Registers a listener for add/remove notifications.
    fn add_listener(&self, listener: Arc<dyn EndpointListener>);

    /// Stops publishing notifications. Idempotent.
    fn close(&self);
}

/// Restricts a candidate set to the endpoints allowed to serve a request.
///
/// Returning `None` (or an empty set) means no endpoint is suitable; the
/// pool fails the call without consulting the load balancer.
pub trait PartitionFilter: Send + Sync {
    fn filter(&self, candidates: &[Endpoint], context: &PartitionContext) -> Option<Vec<Endpoint>>;
}

/// Chooses one endpoint from a non-empty candidate set.
///
/// The statistics view exposes per-endpoint active/idle instance counts as
/// a scoring input. Returning `None` means the algorithm found no
/// acceptable choice and the call fails.
pub trait LoadBalanceAlgorithm: Send + Sync {
    fn choose(&self, candidates: &[Endpoint], statistics: &dyn PoolStatistics) -> Option<Endpoint>;
}

/// Decides whether a failed call gets another attempt.
///
/// `attempt` counts completed failed attempts starting at 1; `elapsed` is
/// measured from the first attempt with a monotonic clock. Implementations
/// that back off sleep inside `allow_retry` before granting the attempt.
#[async_trait]
pub trait RetryPolicy: Send + Sync {
    async fn allow_retry(&self, attempt: u32, elapsed: Duration) -> bool;
}

/// Per-endpoint instance counters, exposed read-only to load balancers.
pub trait PoolStatistics: Send + Sync {
    /// Number of cached instances for `endpoint` sitting idle right now.
    fn num_idle_instances(&self, endpoint: &Endpoint) -> usize;

    /// Number of instances for `endpoint` currently checked out.
    fn num_active_instances(&self, endpoint: &Endpoint) -> usize;
}

/// A caller-supplied operation to run against a checked-out service handle.
///
/// The pool may invoke the callback several times (retries, fan-out), so
/// callbacks are shared behind an `Arc` and must be re-invocable.
#[async_trait]
pub trait ServiceCallback<S, R>: Send + Sync
where
    S: Send + Sync,
{
    async fn call(&self, service: &S) -> CallResult<R>;
}

struct FnCallback<F>(F);

#[async_trait]
impl<S, R, F> ServiceCallback<S, R> for FnCallback<F>
where
    S: Send + Sync,
    R: Send,
    F: for<'a> Fn(&'a S) -> BoxFuture<'a, CallResult<R>> + Send + Sync,
{
    async fn call(&self, service: &S) -> CallResult<R> {
        (self.0)(service).await
    }
}

/// Adapts a closure returning a boxed future into a [`ServiceCallback`].
///
/// # Example
///
/// ```
/// use futures::FutureExt;
/// use wayfinder_common::contracts::callback_fn;
///
/// let op = callback_fn(|svc: &String| async move { Ok(svc.len()) }.boxed());
/// # let _ = op;
/// ```
pub fn callback_fn<S, R, F>(f: F) -> Arc<dyn ServiceCallback<S, R>>
where
    S: Send + Sync + 'static,
    R: Send + 'static,
    F: for<'a> Fn(&'a S) -> BoxFuture<'a, CallResult<R>> + Send + Sync + 'static,
{
    Arc::new(FnCallback(f))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    #[tokio::test]
    async fn test_callback_fn_invokes_closure() {
        let op = callback_fn(|svc: &String| async move { Ok(svc.len()) }.boxed());
        let result = op.call(&"hello".to_string()).await.unwrap();
        assert_eq!(result, 5);
    }

    #[tokio::test]
    async fn test_callback_fn_is_reinvocable() {
        let op = callback_fn(|svc: &u32| async move { Ok(*svc + 1) }.boxed());
        assert_eq!(op.call(&1).await.unwrap(), 2);
        assert_eq!(op.call(&2).await.unwrap(), 3);
    }
}
