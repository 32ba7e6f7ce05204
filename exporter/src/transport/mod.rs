//! Transports to the node.
//!
//! The dispatcher and the service handlers only see the two traits defined
//! here:
//!
//! - [`StreamTransport`]: the daemon websocket, which pushes events and
//!   carries fire-and-forget requests whose answers come back as events,
//! - [`RequestTransport`]: one-shot request/response calls used for
//!   polling.
//!
//! Concrete implementations live in [`websocket`] and [`http`].

pub mod http;
pub mod websocket;

#[cfg(test)]
pub(crate) mod mock;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{RequestError, TransportError};
use crate::types::{Service, WebsocketRequest, WebsocketResponse};

pub use http::HttpClient;
pub use websocket::WebsocketClient;

/// Callback invoked for every inbound frame. A transport error means the
/// frame was unusable and must not be dispatched.
pub type MessageHandler = Arc<dyn Fn(Result<WebsocketResponse, TransportError>) + Send + Sync>;

/// Callback invoked on disconnect or reconnect.
pub type LifecycleHandler = Arc<dyn Fn() + Send + Sync>;

/// Streaming connection to the node daemon.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Subscribes to events addressed to this exporter itself.
    async fn subscribe_self(&self) -> Result<(), TransportError>;

    /// Subscribes to a named topic, e.g. `metrics`.
    async fn subscribe(&self, topic: &str) -> Result<(), TransportError>;

    fn add_handler(&self, handler: MessageHandler) -> Result<(), TransportError>;

    fn add_disconnect_handler(&self, handler: LifecycleHandler);

    fn add_reconnect_handler(&self, handler: LifecycleHandler);

    /// Queues a request without waiting for it to be written or answered.
    fn send(&self, request: WebsocketRequest) -> Result<(), TransportError>;

    /// Tears the subscription down. The transport is unusable afterwards.
    async fn close(&self) -> Result<(), TransportError>;
}

/// One-shot request/response access to a service's RPC API.
#[async_trait]
pub trait RequestTransport: Send + Sync {
    /// Calls `command` on `service` and returns the raw JSON response body.
    async fn request(
        &self,
        service: Service,
        command: &str,
        data: serde_json::Value,
    ) -> Result<Bytes, RequestError>;
}
