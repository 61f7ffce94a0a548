//! Wayfinder Common Types and Contracts
//!
//! This crate provides the shared building blocks of the wayfinder smart
//! client: the endpoint model, the error taxonomy, and the pluggable
//! contracts that the service pool is assembled from.
//!
//! # Overview
//!
//! Wayfinder is the client half of a smart-client / service-mesh pattern.
//! Instead of routing traffic through a server-side load balancer, each
//! client keeps a live view of the available service endpoints, picks a
//! healthy one per request, and retries elsewhere on transient failure.
//! Everything that is environment-specific is expressed as a narrow trait
//! and injected at construction time:
//!
//! - [`HostDiscovery`] - where the current endpoint set comes from
//! - [`ServiceFactory`] - how to build, probe, and tear down a service
//!   handle for one endpoint
//! - [`PartitionFilter`] - which endpoints may serve a given request
//! - [`LoadBalanceAlgorithm`] - which candidate actually gets the request
//! - [`RetryPolicy`] - whether a failed request gets another attempt
//!
//! # Components
//!
//! - [`endpoint`] - the [`Endpoint`] identity type
//! - [`error`] - [`WayfinderError`] and the `Result` alias
//! - [`contracts`] - the pluggable trait seams listed above
//! - [`retry`] - built-in retry policies (never, counted, exponential backoff)
//! - [`balance`] - built-in load-balance strategies
//! - [`partition`] - [`PartitionContext`] and the pass-through filter

pub mod balance;
pub mod contracts;
pub mod endpoint;
pub mod error;
pub mod partition;
pub mod retry;

pub use contracts::*;
pub use endpoint::Endpoint;
pub use error::{OpError, Result, WayfinderError};
pub use partition::PartitionContext;
