//! Error types for the exporter.
//!
//! Errors are split by layer so the caller can tell a fatal transport
//! failure (the stream could not be established) apart from the degraded
//! and event-level failures that are only ever logged.

use std::time::Duration;

use thiserror::Error;

/// Errors raised while defining or registering metrics.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A collector with the same fully-qualified name was already registered.
    #[error("metric `{0}` is already registered")]
    AlreadyRegistered(String),
    /// Invalid metric definition (bad name, label mismatch, ...).
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

/// Errors raised by the streaming (websocket) transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    Websocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("tls setup failed: {0}")]
    Tls(#[from] native_tls::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// A frame or request could not be (de)serialised.
    #[error("malformed message: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("connecting to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },
    /// The transport is not currently connected; the message was dropped.
    #[error("stream is not connected")]
    NotConnected,
    /// The outbound queue is full; the message was dropped.
    #[error("outbound queue is full ({capacity} messages)")]
    QueueFull { capacity: usize },
    #[error("a message handler is already registered")]
    HandlerAlreadyRegistered,
    /// The transport was closed and cannot be used any more.
    #[error("stream transport is closed")]
    Closed,
}

/// Errors raised by the one-shot request transport used for polling.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("reading tls material failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("{url} returned HTTP status {status}")]
    Status { url: String, status: u16 },
    /// The node answered but reported `"success": false`.
    #[error("rpc `{command}` failed: {message}")]
    Rpc { command: String, message: String },
    #[error("malformed rpc response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Top-level startup error.
#[derive(Debug, Error)]
pub enum ExporterError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("metrics server: {0}")]
    Server(#[source] std::io::Error),
}
