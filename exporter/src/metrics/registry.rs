//! Prometheus-backed metrics registry.
//!
//! [`MetricsRegistry`] owns a private Prometheus [`Registry`] so only the
//! exporter's own metrics are exposed, and provides factory helpers that
//! apply the `<namespace>_<subsystem>_<name>` naming convention.

use std::sync::Arc;

use prometheus::core::Collector;
use prometheus::{Counter, CounterVec, Encoder, Gauge, GaugeVec, Opts, Registry, TextEncoder};
use tracing::error;

use crate::error::RegistryError;
use crate::types::Service;

use super::lazy::{LazyCounter, LazyGauge};

/// Handle to the exporter's metric registry.
///
/// Cloning is cheap and every clone refers to the same underlying registry,
/// so one instance is created at startup and passed to every component that
/// needs it. Tests create their own isolated instance.
#[derive(Clone)]
pub struct MetricsRegistry {
    registry: Registry,
    namespace: Arc<str>,
}

impl MetricsRegistry {
    /// Creates an empty registry whose metrics live under `namespace`.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            registry: Registry::new(),
            namespace: Arc::from(namespace.into()),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Registers a collector.
    ///
    /// Registering a collector whose fully-qualified name is already present
    /// fails with [`RegistryError::AlreadyRegistered`]; the registry is left
    /// unchanged.
    pub fn register(&self, collector: Box<dyn Collector>) -> Result<(), RegistryError> {
        let name = collector
            .desc()
            .first()
            .map(|d| d.fq_name.clone())
            .unwrap_or_default();

        match self.registry.register(collector) {
            Ok(()) => Ok(()),
            Err(prometheus::Error::AlreadyReg) => Err(RegistryError::AlreadyRegistered(name)),
            Err(e) => Err(e.into()),
        }
    }

    /// Builds the options for a metric following naming conventions.
    pub fn opts(&self, service: Service, name: &str, help: &str) -> Opts {
        Opts::new(name, help)
            .namespace(self.namespace.to_string())
            .subsystem(service.as_str())
    }

    /// Returns a lazy gauge; it is exported only once it has been written.
    pub fn new_gauge(
        &self,
        service: Service,
        name: &str,
        help: &str,
    ) -> Result<LazyGauge, RegistryError> {
        let gauge = Gauge::with_opts(self.opts(service, name, help))?;
        Ok(LazyGauge::new(gauge, self.clone()))
    }

    /// Returns a lazy counter; it is exported only once it has been written.
    pub fn new_counter(
        &self,
        service: Service,
        name: &str,
        help: &str,
    ) -> Result<LazyCounter, RegistryError> {
        let counter = Counter::with_opts(self.opts(service, name, help))?;
        Ok(LazyCounter::new(counter, self.clone()))
    }

    /// Returns a gauge vector registered immediately.
    ///
    /// Vectors need no lazy wrapper: a label set is only exported once it
    /// has been written, and a family with no label sets is omitted.
    pub fn new_gauge_vec(
        &self,
        service: Service,
        name: &str,
        help: &str,
        labels: &[&str],
    ) -> Result<GaugeVec, RegistryError> {
        let vec = GaugeVec::new(self.opts(service, name, help), labels)?;
        self.register(Box::new(vec.clone()))?;
        Ok(vec)
    }

    /// Returns a counter vector registered immediately.
    pub fn new_counter_vec(
        &self,
        service: Service,
        name: &str,
        help: &str,
        labels: &[&str],
    ) -> Result<CounterVec, RegistryError> {
        let vec = CounterVec::new(self.opts(service, name, help), labels)?;
        self.register(Box::new(vec.clone()))?;
        Ok(vec)
    }

    /// Encodes every registered metric in the Prometheus text format.
    ///
    /// Safe to call while handlers are updating metrics. An encoder failure
    /// would be a bug in metric construction; it is logged and an empty
    /// body is returned.
    pub fn snapshot(&self) -> String {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            error!("failed to encode Prometheus metrics: {e}");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }

    /// Content type of [`MetricsRegistry::snapshot`] output.
    pub fn content_type(&self) -> &'static str {
        prometheus::TEXT_FORMAT
    }
}
