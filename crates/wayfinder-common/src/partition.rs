//! Partition routing context and the default pass-through filter.

use std::collections::BTreeMap;

use crate::contracts::PartitionFilter;
use crate::endpoint::Endpoint;

/// Opaque key/value routing hints attached to one `execute` call.
///
/// The pool never reads the entries; they exist for the embedder's
/// [`PartitionFilter`] to interpret (shard keys, tenant ids, locality
/// hints, ...). An empty context is the common case.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionContext {
    entries: BTreeMap<String, String>,
}

impl PartitionContext {
    /// An empty context, used for calls with no routing hints.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A context with a single unnamed hint, stored under the empty key.
    pub fn of(value: impl Into<String>) -> Self {
        Self::empty().with("", value)
    }

    /// Adds a named hint, replacing any existing value for the key.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// The unnamed hint set by [`PartitionContext::of`], if any.
    pub fn get_default(&self) -> Option<&str> {
        self.get("")
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Admits every candidate regardless of context. The default filter.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThroughFilter;

impl PartitionFilter for PassThroughFilter {
    fn filter(&self, candidates: &[Endpoint], _context: &PartitionContext) -> Option<Vec<Endpoint>> {
        Some(candidates.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_of_sets_default_entry() {
        let ctx = PartitionContext::of("shard-7");
        assert_eq!(ctx.get_default(), Some("shard-7"));
        assert!(!ctx.is_empty());
    }

    #[test]
    fn test_with_replaces_existing_key() {
        let ctx = PartitionContext::empty()
            .with("tenant", "alpha")
            .with("tenant", "beta");
        assert_eq!(ctx.get("tenant"), Some("beta"));
    }

    #[test]
    fn test_empty_context_has_no_entries() {
        let ctx = PartitionContext::empty();
        assert!(ctx.is_empty());
        assert_eq!(ctx.get_default(), None);
    }

    #[test]
    fn test_pass_through_keeps_all_candidates() {
        let candidates = vec![Endpoint::new("a:1"), Endpoint::new("b:1")];
        let kept = PassThroughFilter
            .filter(&candidates, &PartitionContext::empty())
            .unwrap();
        assert_eq!(kept, candidates);
    }
}
