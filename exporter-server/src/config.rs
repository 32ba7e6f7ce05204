//! Exporter server configuration.
//!
//! Every option can be given as a flag or as a `CHIK_EXPORTER_*`
//! environment variable; unset options fall back to the library defaults
//! in `exporter::ExporterConfig`.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use exporter::{ExporterConfig, TlsConfig};

/// Prometheus exporter for a Chik node.
#[derive(Debug, Parser)]
#[command(name = "chik-exporter")]
#[command(version)]
#[command(about = "Exports Chik node metrics for Prometheus", long_about = None)]
pub struct Cli {
    /// Hostname of the node (daemon and RPC)
    #[arg(long, env = "CHIK_EXPORTER_HOSTNAME", default_value = "localhost")]
    pub hostname: String,

    /// Daemon websocket port
    #[arg(long, env = "CHIK_EXPORTER_DAEMON_PORT", default_value_t = 55400)]
    pub daemon_port: u16,

    /// Connect to the daemon over plain ws:// instead of wss://
    #[arg(long, env = "CHIK_EXPORTER_INSECURE_WEBSOCKET", default_value_t = false)]
    pub insecure_websocket: bool,

    /// Call the RPC servers over plain http:// instead of https://
    #[arg(long, env = "CHIK_EXPORTER_INSECURE_RPC", default_value_t = false)]
    pub insecure_rpc: bool,

    /// Name the exporter registers under with the daemon
    #[arg(long, env = "CHIK_EXPORTER_SERVICE_NAME", default_value = "chik_exporter")]
    pub service_name: String,

    /// Seconds between daemon reconnection attempts
    #[arg(long, env = "CHIK_EXPORTER_RECONNECT_INTERVAL_SECS", default_value_t = 5,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub reconnect_interval_secs: u64,

    /// Timeout in seconds for RPC requests
    #[arg(long, env = "CHIK_EXPORTER_RPC_TIMEOUT_SECS", default_value_t = 10,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub rpc_timeout_secs: u64,

    /// Client certificate (PEM) for daemon and RPC TLS
    #[arg(long, env = "CHIK_EXPORTER_TLS_CERT", requires = "tls_key")]
    pub tls_cert: Option<PathBuf>,

    /// Client private key (PKCS#8 PEM) for daemon and RPC TLS
    #[arg(long, env = "CHIK_EXPORTER_TLS_KEY", requires = "tls_cert")]
    pub tls_key: Option<PathBuf>,

    /// Address the metrics server binds to
    #[arg(long, env = "CHIK_EXPORTER_METRICS_ADDRESS", default_value = "0.0.0.0")]
    pub metrics_address: IpAddr,

    /// Port the metrics server listens on
    #[arg(long, env = "CHIK_EXPORTER_METRICS_PORT", default_value_t = 9914)]
    pub metrics_port: u16,

    /// Prefix of every exported metric and of service origin tags
    #[arg(long, env = "CHIK_EXPORTER_NAMESPACE", default_value = "chik")]
    pub namespace: String,

    /// Seconds between compact block count polls
    #[arg(long, env = "CHIK_EXPORTER_BLOCK_COUNT_INTERVAL_SECS", default_value_t = 300,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub block_count_interval_secs: u64,

    /// Seconds between pool state polls
    #[arg(long, env = "CHIK_EXPORTER_POOL_STATE_INTERVAL_SECS", default_value_t = 60,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub pool_state_interval_secs: u64,

    /// Node root directory; defaults to $CHIK_ROOT or ~/.chik/mainnet
    #[arg(long, env = "CHIK_EXPORTER_ROOT_PATH")]
    pub root_path: Option<PathBuf>,

    /// File under <root>/log to record found proofs in
    #[arg(long, env = "CHIK_EXPORTER_PROOF_LOG_FILE")]
    pub proof_log_file: Option<String>,

    /// The logging level (trace|debug|info|warn|error)
    #[arg(long, env = "CHIK_EXPORTER_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Cli {
    pub fn into_config(self) -> ExporterConfig {
        let mut cfg = ExporterConfig::default();

        let tls = match (self.tls_cert, self.tls_key) {
            (Some(cert_path), Some(key_path)) => Some(TlsConfig {
                cert_path,
                key_path,
            }),
            _ => None,
        };

        cfg.daemon.hostname = self.hostname.clone();
        cfg.daemon.port = self.daemon_port;
        cfg.daemon.secure = !self.insecure_websocket;
        cfg.daemon.service_name = self.service_name;
        cfg.daemon.reconnect_interval = Duration::from_secs(self.reconnect_interval_secs);
        cfg.daemon.tls = tls.clone();

        cfg.rpc.hostname = self.hostname;
        cfg.rpc.secure = !self.insecure_rpc;
        cfg.rpc.timeout = Duration::from_secs(self.rpc_timeout_secs);
        cfg.rpc.tls = tls;

        cfg.polling.block_count_interval = Duration::from_secs(self.block_count_interval_secs);
        cfg.polling.pool_state_interval = Duration::from_secs(self.pool_state_interval_secs);

        cfg.metrics.namespace = self.namespace;
        cfg.metrics.listen_addr = SocketAddr::new(self.metrics_address, self.metrics_port);

        if let Some(root) = self.root_path {
            cfg.file_log.root_path = root;
        }
        cfg.file_log.proof_log_file = self.proof_log_file;

        cfg
    }
}
