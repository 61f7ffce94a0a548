//! Batch health-scan result aggregation.

use wayfinder_common::Endpoint;

/// Outcome of one batch scan over the discovered endpoint set.
///
/// The scan stops at the first healthy endpoint, so `healthy` holds at
/// most one entry while `unhealthy` lists every endpoint probed and
/// found bad along the way.
#[derive(Debug, Default)]
pub struct HealthCheckResults {
    healthy: Option<Endpoint>,
    unhealthy: Vec<Endpoint>,
}

impl HealthCheckResults {
    pub fn has_healthy(&self) -> bool {
        self.healthy.is_some()
    }

    pub fn healthy_endpoint(&self) -> Option<&Endpoint> {
        self.healthy.as_ref()
    }

    pub fn unhealthy_endpoints(&self) -> &[Endpoint] {
        &self.unhealthy
    }

    pub(crate) fn record_healthy(&mut self, endpoint: Endpoint) {
        self.healthy = Some(endpoint);
    }

    pub(crate) fn record_unhealthy(&mut self, endpoint: Endpoint) {
        self.unhealthy.push(endpoint);
    }
}
