//! Shared background eviction worker.
//!
//! One sweeper serves any number of caches. Caches are held by weak
//! reference, so a dropped or closed cache falls out of the schedule on
//! its own and closing a cache needs no deregistration call.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Anything the sweeper can drive. Implemented by the service cache.
#[async_trait]
pub trait Sweepable: Send + Sync {
    async fn sweep(&self);
    fn is_closed(&self) -> bool;
}

/// A long-lived worker that periodically sweeps every registered cache.
pub struct CacheSweeper {
    registry: Arc<Mutex<Vec<Weak<dyn Sweepable>>>>,
    task: JoinHandle<()>,
}

impl CacheSweeper {
    /// Spawns the sweep loop on the current runtime.
    pub fn spawn(interval: Duration) -> Self {
        let registry: Arc<Mutex<Vec<Weak<dyn Sweepable>>>> = Arc::new(Mutex::new(Vec::new()));

        let task = {
            let registry = registry.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval_at(
                    tokio::time::Instant::now() + interval,
                    interval,
                );
                loop {
                    ticker.tick().await;
                    Self::sweep_all(&registry).await;
                }
            })
        };

        Self { registry, task }
    }

    /// Adds a cache to the schedule.
    pub fn register(&self, cache: Weak<dyn Sweepable>) {
        match self.registry.lock() {
            Ok(mut guard) => guard.push(cache),
            Err(poisoned) => poisoned.into_inner().push(cache),
        }
    }

    async fn sweep_all(registry: &Mutex<Vec<Weak<dyn Sweepable>>>) {
        // Snapshot live caches and prune the dead outside any await.
        let live: Vec<Arc<dyn Sweepable>> = {
            let mut guard = match registry.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.retain(|weak| {
                weak.upgrade()
                    .map(|cache| !cache.is_closed())
                    .unwrap_or(false)
            });
            guard.iter().filter_map(Weak::upgrade).collect()
        };

        debug!(caches = live.len(), "running eviction sweep");
        for cache in live {
            // Each sweep runs in its own task so a panic in one cache
            // cannot kill the schedule.
            let sweep = tokio::spawn(async move { cache.sweep().await });
            if let Err(join_error) = sweep.await {
                error!(%join_error, "eviction sweep failed; schedule continues");
            }
        }
    }

    /// Stops the sweep loop. Registered caches are untouched.
    pub fn shutdown(&self) {
        self.task.abort();
    }
}

impl Drop for CacheSweeper {
    fn drop(&mut self) {
        self.task.abort();
    }
}
