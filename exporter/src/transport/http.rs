//! RPC client used for polling.
//!
//! Each node service exposes a JSON RPC API where every command is a
//! `POST /<command>` with a JSON body, e.g.:
//!
//! ```json
//! POST https://localhost:58555/get_block_count_metrics
//! {}
//!
//! Response:
//! {
//!   "metrics": { "compact_blocks": 1200, "uncompact_blocks": 3, "hint_count": 90 },
//!   "success": true
//! }
//! ```
//!
//! A response with `"success": false` carries an `"error"` string and is
//! reported as [`RequestError::Rpc`].

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Identity};
use serde::Deserialize;

use crate::config::{RpcConfig, ServicePorts};
use crate::error::RequestError;
use crate::types::Service;

use super::RequestTransport;

/// HTTPS client for the services' RPC endpoints.
///
/// The node's services use certificates from a private CA, so server
/// certificates are not verified; the client authenticates with the
/// configured client certificate when present.
pub struct HttpClient {
    scheme: &'static str,
    hostname: String,
    ports: ServicePorts,
    client: Client,
    timeout: Duration,
}

impl HttpClient {
    /// Builds a client from the RPC configuration.
    ///
    /// Fails when the TLS material cannot be read or parsed; callers treat
    /// that as "polling unavailable" rather than a fatal error.
    pub fn new(cfg: &RpcConfig) -> Result<Self, RequestError> {
        let mut builder = Client::builder()
            .timeout(cfg.timeout)
            .danger_accept_invalid_certs(true);

        if let Some(tls) = &cfg.tls {
            let cert = std::fs::read(&tls.cert_path)?;
            let key = std::fs::read(&tls.key_path)?;
            builder = builder.identity(Identity::from_pkcs8_pem(&cert, &key)?);
        }

        Ok(Self {
            scheme: if cfg.secure { "https" } else { "http" },
            hostname: cfg.hostname.clone(),
            ports: cfg.ports.clone(),
            client: builder.build()?,
            timeout: cfg.timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn endpoint(&self, service: Service, command: &str) -> String {
        format!(
            "{}://{}:{}/{}",
            self.scheme,
            self.hostname,
            self.ports.port(service),
            command.trim_start_matches('/')
        )
    }
}

/// Status fields every RPC response carries.
#[derive(Debug, Deserialize)]
struct RpcStatus {
    #[serde(default = "default_success")]
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

fn default_success() -> bool {
    true
}

fn check_rpc_status(command: &str, body: &[u8]) -> Result<(), RequestError> {
    let status: RpcStatus = serde_json::from_slice(body)?;
    if status.success {
        return Ok(());
    }
    Err(RequestError::Rpc {
        command: command.to_string(),
        message: status
            .error
            .unwrap_or_else(|| "no error message".to_string()),
    })
}

#[async_trait]
impl RequestTransport for HttpClient {
    async fn request(
        &self,
        service: Service,
        command: &str,
        data: serde_json::Value,
    ) -> Result<Bytes, RequestError> {
        let url = self.endpoint(service, command);

        let resp = self.client.post(&url).json(&data).send().await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(RequestError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let body = resp.bytes().await?;
        check_rpc_status(command, &body)?;
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    use super::*;
    use crate::config::TlsConfig;

    /// Serves one canned HTTP response on a local port and hands back the
    /// raw request it received.
    async fn serve_once(status: &'static str, body: &'static str) -> (RpcConfig, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = socket.read(&mut buf).await.expect("read");
                request.extend_from_slice(&buf[..n]);
                if n == 0 || request_complete(&request) {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.expect("write");
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&request).into_owned()
        });

        let mut ports = ServicePorts::default();
        ports.farmer = port;
        let cfg = RpcConfig {
            hostname: "127.0.0.1".to_string(),
            secure: false,
            ports,
            ..RpcConfig::default()
        };
        (cfg, server)
    }

    fn request_complete(request: &[u8]) -> bool {
        let text = String::from_utf8_lossy(request);
        let Some((head, body)) = text.split_once("\r\n\r\n") else {
            return false;
        };
        let length = head
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        body.len() >= length
    }

    #[test]
    fn endpoint_uses_service_port() {
        let client = HttpClient::new(&RpcConfig::default()).expect("client");
        assert_eq!(
            client.endpoint(Service::FullNode, "/get_block_count_metrics"),
            "https://localhost:58555/get_block_count_metrics"
        );
        assert_eq!(
            client.endpoint(Service::Farmer, "get_pool_state"),
            "https://localhost:58559/get_pool_state"
        );
    }

    #[test]
    fn insecure_config_uses_plain_http() {
        let cfg = RpcConfig {
            secure: false,
            ..RpcConfig::default()
        };
        let client = HttpClient::new(&cfg).expect("client");
        assert_eq!(
            client.endpoint(Service::Wallet, "get_sync_status"),
            "http://localhost:59256/get_sync_status"
        );
    }

    #[tokio::test]
    async fn successful_response_body_is_returned() {
        let (cfg, server) = serve_once(
            "200 OK",
            r#"{"pool_state": [], "success": true}"#,
        )
        .await;
        let client = HttpClient::new(&cfg).expect("client");

        let body = client
            .request(Service::Farmer, "get_pool_state", serde_json::json!({}))
            .await
            .expect("request");
        assert_eq!(&body[..], br#"{"pool_state": [], "success": true}"#);

        let request = server.await.expect("server");
        assert!(request.starts_with("POST /get_pool_state HTTP/1.1\r\n"));
        assert!(request.ends_with("{}"));
    }

    #[tokio::test]
    async fn server_error_status_is_reported() {
        let (cfg, server) = serve_once("500 Internal Server Error", r#"{"error": "boom"}"#).await;
        let client = HttpClient::new(&cfg).expect("client");

        let err = client
            .request(Service::Farmer, "get_pool_state", serde_json::json!({}))
            .await
            .expect_err("should fail");
        assert!(matches!(
            err,
            RequestError::Status { ref url, status: 500 } if url.ends_with("/get_pool_state")
        ));
        server.await.expect("server");
    }

    #[tokio::test]
    async fn unsuccessful_rpc_body_is_reported() {
        let (cfg, server) = serve_once(
            "200 OK",
            r#"{"success": false, "error": "farmer not running"}"#,
        )
        .await;
        let client = HttpClient::new(&cfg).expect("client");

        let err = client
            .request(Service::Farmer, "get_pool_state", serde_json::json!({}))
            .await
            .expect_err("should fail");
        assert!(matches!(
            err,
            RequestError::Rpc { ref message, .. } if message == "farmer not running"
        ));
        server.await.expect("server");
    }

    #[test]
    fn missing_tls_material_fails_construction() {
        let cfg = RpcConfig {
            tls: Some(TlsConfig {
                cert_path: "/nonexistent/private_daemon.crt".into(),
                key_path: "/nonexistent/private_daemon.key".into(),
            }),
            ..RpcConfig::default()
        };
        assert!(matches!(HttpClient::new(&cfg), Err(RequestError::Io(_))));
    }

    #[test]
    fn rpc_failure_is_reported() {
        let err = check_rpc_status(
            "get_pool_state",
            br#"{"success": false, "error": "farmer not running"}"#,
        )
        .expect_err("should fail");
        assert!(matches!(
            err,
            RequestError::Rpc { ref command, ref message }
                if command == "get_pool_state" && message == "farmer not running"
        ));

        check_rpc_status("get_plots", br#"{"plots": [], "success": true}"#).expect("ok");
        check_rpc_status("get_plots", br#"{"plots": []}"#).expect("ok without flag");
    }
}
