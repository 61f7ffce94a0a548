use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// The addressable identity of one remote service instance.
///
/// An endpoint pairs a stable id (typically `host:port` or a registration
/// uuid) with an opaque JSON payload carrying whatever metadata the
/// registration side chose to publish (admin port, version, zone, ...).
/// The payload is never interpreted by wayfinder itself; it exists for the
/// [`ServiceFactory`](crate::ServiceFactory) and for partition filters.
///
/// Equality and hashing consider only the id, so two snapshots of the same
/// endpoint compare equal even if the published payload drifted between
/// them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    id: String,
    payload: serde_json::Value,
}

impl Endpoint {
    /// Creates an endpoint with an empty payload.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            payload: serde_json::Value::Null,
        }
    }

    /// Creates an endpoint carrying a metadata payload.
    pub fn with_payload(id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            payload,
        }
    }

    /// The stable identity of this endpoint.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The opaque metadata published alongside this endpoint.
    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Endpoint {}

impl Hash for Endpoint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id)
    }
}
