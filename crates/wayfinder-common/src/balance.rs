//! Built-in load-balance strategies.

use rand::seq::SliceRandom;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::contracts::{LoadBalanceAlgorithm, PoolStatistics};
use crate::endpoint::Endpoint;

/// Rotates through candidates with a shared atomic cursor.
///
/// The cursor is global to the balancer, not per candidate set, so the
/// rotation stays fair even while endpoints come and go between calls.
#[derive(Debug, Default)]
pub struct RoundRobinBalancer {
    next: AtomicUsize,
}

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalanceAlgorithm for RoundRobinBalancer {
    fn choose(&self, candidates: &[Endpoint], _statistics: &dyn PoolStatistics) -> Option<Endpoint> {
        if candidates.is_empty() {
            return None;
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed) % candidates.len();
        Some(candidates[index].clone())
    }
}

/// Picks a candidate uniformly at random.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomBalancer;

impl LoadBalanceAlgorithm for RandomBalancer {
    fn choose(&self, candidates: &[Endpoint], _statistics: &dyn PoolStatistics) -> Option<Endpoint> {
        candidates.choose(&mut rand::thread_rng()).cloned()
    }
}

/// Picks the candidate with the fewest checked-out instances.
///
/// Ties go to the earliest candidate in the slice, which keeps the choice
/// deterministic for a stable candidate ordering.
#[derive(Debug, Clone, Copy, Default)]
pub struct FewestActiveBalancer;

impl LoadBalanceAlgorithm for FewestActiveBalancer {
    fn choose(&self, candidates: &[Endpoint], statistics: &dyn PoolStatistics) -> Option<Endpoint> {
        candidates
            .iter()
            .min_by_key(|endpoint| statistics.num_active_instances(endpoint))
            .cloned()
    }
}
