use thiserror::Error;

/// Failure raised by a caller-supplied operation or by a service factory.
///
/// Operations are free to fail with any error type; the pool never
/// interprets the value beyond asking the factory to classify it as
/// retriable or not, and hands it back to the caller unchanged inside
/// [`WayfinderError::MaxRetries`], [`WayfinderError::OnlyBadHosts`], or
/// [`WayfinderError::OperationFailed`]. Callers can `downcast_ref` to
/// recover the concrete type.
pub type OpError = Box<dyn std::error::Error + Send + Sync>;

/// The error taxonomy visible to callers of the service pool.
///
/// Apart from `PoolClosed` (a use-after-close), these are the only ways an
/// `execute` call can fail; background health checks and eviction sweeps
/// swallow and log their own failures.
#[derive(Debug, Error)]
pub enum WayfinderError {
    /// Host discovery currently reports zero endpoints.
    #[error("no endpoints are currently registered with host discovery")]
    NoAvailableHosts,

    /// Endpoints exist, but partition filtering or load balancing
    /// eliminated every candidate.
    #[error("no endpoint survived partition filtering and load balancing")]
    NoSuitableHosts,

    /// Every endpoint known to host discovery is currently marked bad.
    ///
    /// Carries the failure that exhausted the last endpoint when this call
    /// made at least one attempt before running out of candidates.
    #[error("every known endpoint is currently marked bad")]
    OnlyBadHosts {
        #[source]
        source: Option<OpError>,
    },

    /// The retry policy declined another attempt while selectable
    /// endpoints still remained.
    #[error("retry policy declined further attempts")]
    MaxRetries {
        #[source]
        source: OpError,
    },

    /// The connection cache could not satisfy a check-out: the endpoint or
    /// pool is at capacity and the exhaustion action was FAIL, or a WAIT
    /// timed out.
    #[error("service cache exhausted; no instances available for check-out")]
    NoCachedInstancesAvailable,

    /// The operation failed with an error the factory classified as
    /// non-retriable. The original error is carried unchanged.
    #[error("operation failed with a non-retriable error")]
    OperationFailed {
        #[source]
        source: OpError,
    },

    /// The pool (or its cache) was already closed.
    #[error("service pool is closed")]
    PoolClosed,
}

pub type Result<T> = std::result::Result<T, WayfinderError>;
