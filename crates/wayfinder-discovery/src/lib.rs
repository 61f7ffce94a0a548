//! Wayfinder Host Discovery
//!
//! Implementations of the [`wayfinder_common::HostDiscovery`] contract.
//! The pool only ever reads discovery; mutation happens on the
//! registration side (here, the embedder driving [`FixedHostDiscovery`]
//! directly, or in a real deployment a registry watcher pushing updates).

pub mod fixed;

pub use fixed::FixedHostDiscovery;
