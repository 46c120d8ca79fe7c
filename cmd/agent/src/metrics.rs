//! OpenMetrics text exposition for `/metrics`, built on `prometheus-client`:
//! a small `Registry` of gauges encoded into a text buffer on demand.

use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

pub struct Metrics {
    registry: Registry,
    members: Gauge,
    services: Gauge,
    fresh_endpoints: Gauge,
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();
        let members = Gauge::default();
        let services = Gauge::default();
        let fresh_endpoints = Gauge::default();
        registry.register("swarmd_members", "Nodes currently known to membership", members.clone());
        registry.register(
            "swarmd_services",
            "Distinct (namespace, service) keys held by the registry",
            services.clone(),
        );
        registry.register(
            "swarmd_fresh_endpoints",
            "Endpoints currently healthy and within the freshness window, across all services",
            fresh_endpoints.clone(),
        );
        Self {
            registry,
            members,
            services,
            fresh_endpoints,
        }
    }

    pub fn set_members(&self, n: i64) {
        self.members.set(n);
    }

    pub fn set_services(&self, n: i64) {
        self.services.set(n);
    }

    pub fn set_fresh_endpoints(&self, n: i64) {
        self.fresh_endpoints.set(n);
    }

    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buffer = String::new();
        encode(&mut buffer, &self.registry)?;
        Ok(buffer)
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
