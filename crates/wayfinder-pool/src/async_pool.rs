//! Task-per-call and fan-out wrappers over [`ServicePool`].

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use wayfinder_common::{
    Endpoint, PartitionContext, Result, RetryPolicy, ServiceCallback, ServiceFactory,
    WayfinderError,
};

use crate::pool::ServicePool;

/// Runs pool operations as spawned tasks instead of inline awaits.
///
/// Single-call `execute` keeps all of the pool's selection and failure
/// semantics; the fan-out variants pin each task to one endpoint and skip
/// selection entirely.
pub struct AsyncServicePool<F: ServiceFactory> {
    pool: Arc<ServicePool<F>>,
    shutdown_pool_on_close: bool,
}

impl<F: ServiceFactory> AsyncServicePool<F> {
    /// Wraps `pool`. When `shutdown_pool_on_close` is set, closing this
    /// wrapper also closes the underlying pool.
    pub fn new(pool: Arc<ServicePool<F>>, shutdown_pool_on_close: bool) -> Self {
        Self {
            pool,
            shutdown_pool_on_close,
        }
    }

    pub fn pool(&self) -> &Arc<ServicePool<F>> {
        &self.pool
    }

    /// Submits one load-balanced call and returns a handle to its result.
    pub fn execute<R>(
        &self,
        retry: Arc<dyn RetryPolicy>,
        callback: Arc<dyn ServiceCallback<F::Service, R>>,
    ) -> JoinHandle<Result<R>>
    where
        R: Send + 'static,
    {
        self.execute_with_partition(PartitionContext::empty(), retry, callback)
    }

    pub fn execute_with_partition<R>(
        &self,
        context: PartitionContext,
        retry: Arc<dyn RetryPolicy>,
        callback: Arc<dyn ServiceCallback<F::Service, R>>,
    ) -> JoinHandle<Result<R>>
    where
        R: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::spawn(async move { pool.execute_with_partition(context, retry, callback).await })
    }

    /// Submits one task per currently discovered endpoint.
    pub fn execute_on_all<R>(
        &self,
        retry: Arc<dyn RetryPolicy>,
        callback: Arc<dyn ServiceCallback<F::Service, R>>,
    ) -> Result<Vec<JoinHandle<Result<R>>>>
    where
        R: Send + 'static,
    {
        self.execute_on(|_| true, retry, callback)
    }

    /// Submits one task per discovered endpoint accepted by `predicate`.
    ///
    /// Each task retries against its own endpoint only; there is no
    /// re-selection. Fails with [`WayfinderError::NoAvailableHosts`] when
    /// no endpoint matches, rather than returning an empty batch.
    pub fn execute_on<R>(
        &self,
        predicate: impl Fn(&Endpoint) -> bool,
        retry: Arc<dyn RetryPolicy>,
        callback: Arc<dyn ServiceCallback<F::Service, R>>,
    ) -> Result<Vec<JoinHandle<Result<R>>>>
    where
        R: Send + 'static,
    {
        let matching: Vec<Endpoint> = self
            .pool
            .all_endpoints()
            .into_iter()
            .filter(|endpoint| predicate(endpoint))
            .collect();
        if matching.is_empty() {
            return Err(WayfinderError::NoAvailableHosts);
        }

        let handles = matching
            .into_iter()
            .map(|endpoint| {
                let pool = self.pool.clone();
                let retry = retry.clone();
                let callback = callback.clone();
                tokio::spawn(async move {
                    let result = pool.execute_on_endpoint(&endpoint, retry, callback).await;
                    if let Err(error) = &result {
                        info!(endpoint = %endpoint, %error, "fan-out task failed");
                    }
                    result
                })
            })
            .collect::<Vec<_>>();

        debug!(batch_size = handles.len(), "submitted fan-out batch");
        Ok(handles)
    }

    pub fn num_valid_endpoints(&self) -> usize {
        self.pool.num_valid_endpoints()
    }

    pub fn num_bad_endpoints(&self) -> usize {
        self.pool.num_bad_endpoints()
    }

    /// Closes the underlying pool when this wrapper owns it. Idempotent.
    pub async fn close(&self) {
        if self.shutdown_pool_on_close {
            self.pool.close().await;
        }
    }
}
