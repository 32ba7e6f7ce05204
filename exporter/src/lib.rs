//! Exporter library crate.
//!
//! This crate turns the Chik node daemon's websocket event stream into
//! Prometheus metrics:
//!
//! - domain types and the daemon message envelope (`types`),
//! - the streaming and request/response transports (`transport`),
//! - a metric registry with lazily registered handles (`metrics`),
//! - one metric handler per monitored service (`services`),
//! - event routing and handler lifecycle (`dispatcher`),
//! - recurring polls for data that is never pushed (`poller`),
//! - append-only file logs under the node root (`file_log`),
//! - and a top-level exporter configuration (`config`).
//!
//! The `exporter-server` binary wires these together behind an HTTP
//! scrape endpoint.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod file_log;
pub mod metrics;
pub mod poller;
pub mod services;
pub mod transport;
pub mod types;

// Re-export top-level configuration types.
pub use config::{
    DaemonConfig, ExporterConfig, FileLogConfig, MetricsConfig, PollingConfig, RpcConfig,
    ServicePorts, TlsConfig,
};

pub use dispatcher::Dispatcher;
pub use error::{ExporterError, RegistryError, RequestError, TransportError};
pub use metrics::{LazyCounter, LazyGauge, MetricsRegistry};

// Re-export transports and their traits.
pub use transport::{HttpClient, RequestTransport, StreamTransport, WebsocketClient};

pub use types::{NodeType, Service, WebsocketRequest, WebsocketResponse};
