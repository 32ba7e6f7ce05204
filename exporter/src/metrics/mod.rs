//! Metric registry and lazily registered metric handles.
//!
//! Typical usage in a service handler:
//!
//! ```ignore
//! use exporter::metrics::MetricsRegistry;
//! use exporter::Service;
//!
//! let registry = MetricsRegistry::new("chik");
//! let height = registry.new_gauge(Service::FullNode, "node_height", "Peak height")?;
//!
//! // Not exported yet; the first write registers it.
//! height.set(4_200_000.0);
//! let body = registry.snapshot();
//! ```

pub mod lazy;
pub mod registry;

pub use lazy::{LazyCounter, LazyGauge, LazyMetric, LazyState};
pub use registry::MetricsRegistry;
