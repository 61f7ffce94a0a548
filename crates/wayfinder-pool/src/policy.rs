//! Caching policy configuration.

use std::time::Duration;

/// What a check-out does when the cache is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExhaustionAction {
    /// Fail the check-out immediately.
    Fail,
    /// Create a fresh instance anyway, temporarily exceeding the limit.
    Grow,
    /// Poll for a freed instance until the timeout, then fail.
    Wait(Duration),
}

/// Sizing and lifetime limits for the connection cache.
///
/// A capacity of `0` means unlimited. Setting `max_idle_time` to zero
/// disables idle caching entirely: instances are destroyed at check-in
/// instead of being kept warm.
#[derive(Debug, Clone, Copy)]
pub struct CachingPolicy {
    /// Cap on instances across all endpoints. `0` = unlimited.
    pub max_total_instances: usize,
    /// Cap on instances per endpoint. `0` = unlimited.
    pub max_instances_per_endpoint: usize,
    /// How long an idle instance may sit before the sweeper evicts it.
    pub max_idle_time: Duration,
    /// Behavior when a check-out hits a capacity limit.
    pub exhaustion_action: ExhaustionAction,
}

impl CachingPolicy {
    /// A policy that caches nothing: every check-out creates and every
    /// check-in destroys.
    pub fn no_caching() -> Self {
        Self {
            max_total_instances: 0,
            max_instances_per_endpoint: 0,
            max_idle_time: Duration::ZERO,
            exhaustion_action: ExhaustionAction::Grow,
        }
    }

    /// Whether this policy keeps any instances warm at all.
    pub fn caches(&self) -> bool {
        !self.max_idle_time.is_zero()
    }

    /// Whether the sweeper has anything to do for a cache with this policy.
    /// Any policy that keeps instances warm needs idle-time eviction,
    /// whatever its capacity limits.
    pub fn needs_sweeping(&self) -> bool {
        self.caches()
    }
}

impl Default for CachingPolicy {
    /// Unlimited capacity, five-minute idle lifetime, grow on exhaustion.
    fn default() -> Self {
        Self {
            max_total_instances: 0,
            max_instances_per_endpoint: 0,
            max_idle_time: Duration::from_secs(300),
            exhaustion_action: ExhaustionAction::Grow,
        }
    }
}
