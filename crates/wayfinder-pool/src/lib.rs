//! Wayfinder Service Pool
//!
//! The core of the wayfinder smart client: a per-service orchestrator
//! that selects healthy endpoints, pools live service instances, and
//! retries failed operations elsewhere.
//!
//! # Overview
//!
//! A [`ServicePool`] is assembled from a discovery source and a
//! [`ServiceFactory`](wayfinder_common::ServiceFactory) by the
//! [`ServicePoolBuilder`]. Each `execute` call picks a non-bad endpoint
//! (partition filter, then load balancer), checks a pooled instance out
//! of the [`ServiceCache`], runs the caller's operation, and classifies
//! any failure: retriable failures mark the endpoint bad and may be
//! retried elsewhere under the caller's retry policy, non-retriable
//! failures propagate unchanged.
//!
//! Bad endpoints heal through two paths: a fire-and-forget health check
//! submitted the moment an endpoint is marked bad, and a periodic rescan
//! of the whole bad set.
//!
//! # Components
//!
//! - [`pool`] - the [`ServicePool`] orchestrator
//! - [`cache`] - [`ServiceCache`], the revision-stamped connection cache
//! - [`policy`] - [`CachingPolicy`] and [`ExhaustionAction`]
//! - [`sweeper`] - [`CacheSweeper`], the shared idle-eviction worker
//! - [`async_pool`] - [`AsyncServicePool`], task-per-call and fan-out
//! - [`builder`] - [`ServicePoolBuilder`]
//! - [`health`] - [`HealthCheckResults`] batch-scan aggregation
//! - [`stats`] - [`ServicePoolStatistics`]
//!
//! # Example
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use futures::FutureExt;
//! # use wayfinder_common::{callback_fn, retry::MaxAttemptsRetry};
//! # use wayfinder_discovery::FixedHostDiscovery;
//! # use wayfinder_pool::ServicePoolBuilder;
//! # async fn demo<F: wayfinder_common::ServiceFactory<Service = String>>(
//! #     discovery: Arc<FixedHostDiscovery>,
//! #     factory: Arc<F>,
//! # ) -> wayfinder_common::Result<usize> {
//! let pool = ServicePoolBuilder::new(discovery, factory).build();
//! let retry = Arc::new(MaxAttemptsRetry::new(3));
//! pool.execute(
//!     retry,
//!     callback_fn(|svc: &String| async move { Ok(svc.len()) }.boxed()),
//! )
//! .await
//! # }
//! ```

pub mod async_pool;
pub mod builder;
pub mod cache;
pub mod health;
pub mod policy;
pub mod pool;
pub mod stats;
pub mod sweeper;

pub use async_pool::AsyncServicePool;
pub use builder::ServicePoolBuilder;
pub use cache::{CheckOutError, ServiceCache, ServiceHandle};
pub use health::HealthCheckResults;
pub use policy::{CachingPolicy, ExhaustionAction};
pub use pool::ServicePool;
pub use stats::ServicePoolStatistics;
pub use sweeper::{CacheSweeper, Sweepable};
