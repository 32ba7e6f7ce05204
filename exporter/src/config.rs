//! Top-level configuration for the exporter.
//!
//! This module aggregates configuration for:
//!
//! - the daemon websocket connection (`DaemonConfig`),
//! - the per-service RPC client used for polling (`RpcConfig`),
//! - polling cadences (`PollingConfig`),
//! - the metrics exporter (`MetricsConfig`),
//! - file logging (`FileLogConfig`).
//!
//! Binaries build an [`ExporterConfig`] from defaults, flags or the
//! environment and hand it to the transports and the dispatcher.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::types::Service;

/// Client certificate used for mutual TLS with the node.
///
/// Both files are PEM encoded; the key must be PKCS#8.
#[derive(Clone, Debug)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// Configuration for the daemon websocket stream.
#[derive(Clone, Debug)]
pub struct DaemonConfig {
    /// Hostname of the node running the daemon.
    pub hostname: String,
    pub port: u16,
    /// `wss://` when true, plain `ws://` otherwise.
    pub secure: bool,
    /// Name this exporter registers itself under with the daemon.
    pub service_name: String,
    /// Delay between reconnection attempts after the stream drops.
    pub reconnect_interval: Duration,
    /// Timeout for establishing a connection.
    pub connect_timeout: Duration,
    pub tls: Option<TlsConfig>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            port: 55400,
            secure: true,
            service_name: "chik_exporter".to_string(),
            reconnect_interval: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            tls: None,
        }
    }
}

impl DaemonConfig {
    pub fn url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{scheme}://{}:{}", self.hostname, self.port)
    }
}

/// RPC ports of the individual services.
#[derive(Clone, Debug)]
pub struct ServicePorts {
    pub full_node: u16,
    pub wallet: u16,
    pub crawler: u16,
    pub timelord: u16,
    pub harvester: u16,
    pub farmer: u16,
}

impl Default for ServicePorts {
    fn default() -> Self {
        Self {
            full_node: 58555,
            wallet: 59256,
            crawler: 58561,
            timelord: 58557,
            harvester: 58560,
            farmer: 58559,
        }
    }
}

impl ServicePorts {
    pub fn port(&self, service: Service) -> u16 {
        match service {
            Service::FullNode => self.full_node,
            Service::Wallet => self.wallet,
            Service::Crawler => self.crawler,
            Service::Timelord => self.timelord,
            Service::Harvester => self.harvester,
            Service::Farmer => self.farmer,
        }
    }
}

/// Configuration for the RPC request transport.
#[derive(Clone, Debug)]
pub struct RpcConfig {
    pub hostname: String,
    /// `https://` when true, plain `http://` otherwise.
    pub secure: bool,
    /// Per-request timeout.
    pub timeout: Duration,
    pub ports: ServicePorts,
    pub tls: Option<TlsConfig>,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            secure: true,
            timeout: Duration::from_secs(10),
            ports: ServicePorts::default(),
            tls: None,
        }
    }
}

/// Cadences for metrics that have no push event and must be polled.
#[derive(Clone, Debug)]
pub struct PollingConfig {
    /// Full node compact/uncompact block counts.
    pub block_count_interval: Duration,
    /// Farmer pool state.
    pub pool_state_interval: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            block_count_interval: Duration::from_secs(5 * 60),
            pool_state_interval: Duration::from_secs(60),
        }
    }
}

/// Configuration for the Prometheus metrics exporter.
#[derive(Clone, Debug)]
pub struct MetricsConfig {
    /// Namespace prefixed to every metric and used to build origin tags.
    pub namespace: String,
    /// Address to bind the metrics HTTP server to.
    pub listen_addr: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            namespace: "chik".to_string(),
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 9914)),
        }
    }
}

/// Configuration for append-only file logs under `<root_path>/log/`.
#[derive(Clone, Debug)]
pub struct FileLogConfig {
    pub root_path: PathBuf,
    /// When set, the harvester appends a line here each time proofs are found.
    pub proof_log_file: Option<String>,
}

impl Default for FileLogConfig {
    fn default() -> Self {
        Self {
            root_path: crate::file_log::default_root_path(),
            proof_log_file: None,
        }
    }
}

/// Top-level configuration for the exporter.
#[derive(Clone, Debug, Default)]
pub struct ExporterConfig {
    pub daemon: DaemonConfig,
    pub rpc: RpcConfig,
    pub polling: PollingConfig,
    pub metrics: MetricsConfig,
    pub file_log: FileLogConfig,
}
