//! In-memory transports for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::{RequestError, TransportError};
use crate::types::{Service, WebsocketRequest, WebsocketResponse};

use super::{LifecycleHandler, MessageHandler, RequestTransport, StreamTransport};

/// Stream transport that records outbound traffic and lets tests inject
/// events and connection-state changes.
#[derive(Default)]
pub struct MockTransport {
    pub fail_subscribe: AtomicBool,
    subscriptions: Mutex<Vec<String>>,
    sent: Mutex<Vec<WebsocketRequest>>,
    handler: Mutex<Option<MessageHandler>>,
    disconnect: Mutex<Vec<LifecycleHandler>>,
    reconnect: Mutex<Vec<LifecycleHandler>>,
    closed: AtomicBool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers a frame to the registered message handler.
    pub fn emit(&self, result: Result<WebsocketResponse, TransportError>) {
        let handler = self.handler.lock().clone();
        if let Some(handler) = handler {
            handler(result);
        }
    }

    pub fn emit_event(&self, origin: &str, command: &str, data: &str) {
        self.emit(Ok(event(origin, command, data)));
    }

    pub fn drop_connection(&self) {
        let handlers = self.disconnect.lock().clone();
        handlers.iter().for_each(|h| h());
    }

    pub fn restore_connection(&self) {
        let handlers = self.reconnect.lock().clone();
        handlers.iter().for_each(|h| h());
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().clone()
    }

    /// Drains and returns `(destination, command)` of every sent request.
    pub fn take_sent(&self) -> Vec<(String, String)> {
        self.sent
            .lock()
            .drain(..)
            .map(|r| (r.destination, r.command))
            .collect()
    }

    pub fn sent_requests(&self) -> Vec<WebsocketRequest> {
        self.sent.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Builds an event envelope as the daemon would send it.
pub fn event(origin: &str, command: &str, data: &str) -> WebsocketResponse {
    WebsocketResponse {
        command: command.to_string(),
        ack: false,
        data: Bytes::copy_from_slice(data.as_bytes()),
        request_id: String::new(),
        destination: "chik_exporter".to_string(),
        origin: origin.to_string(),
    }
}

#[async_trait]
impl StreamTransport for MockTransport {
    async fn subscribe_self(&self) -> Result<(), TransportError> {
        self.subscribe("chik_exporter").await
    }

    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        self.subscriptions.lock().push(topic.to_string());
        Ok(())
    }

    fn add_handler(&self, handler: MessageHandler) -> Result<(), TransportError> {
        let mut slot = self.handler.lock();
        if slot.is_some() {
            return Err(TransportError::HandlerAlreadyRegistered);
        }
        *slot = Some(handler);
        Ok(())
    }

    fn add_disconnect_handler(&self, handler: LifecycleHandler) {
        self.disconnect.lock().push(handler);
    }

    fn add_reconnect_handler(&self, handler: LifecycleHandler) {
        self.reconnect.lock().push(handler);
    }

    fn send(&self, request: WebsocketRequest) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.sent.lock().push(request);
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Request transport answering from a fixed table of canned responses.
#[derive(Default)]
pub struct MockRequester {
    responses: Mutex<HashMap<String, Result<String, String>>>,
    calls: Mutex<Vec<(Service, String)>>,
}

impl MockRequester {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, command: &str, body: &str) {
        self.responses
            .lock()
            .insert(command.to_string(), Ok(body.to_string()));
    }

    pub fn fail(&self, command: &str, message: &str) {
        self.responses
            .lock()
            .insert(command.to_string(), Err(message.to_string()));
    }

    pub fn calls(&self) -> Vec<(Service, String)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl RequestTransport for MockRequester {
    async fn request(
        &self,
        service: Service,
        command: &str,
        _data: serde_json::Value,
    ) -> Result<Bytes, RequestError> {
        self.calls.lock().push((service, command.to_string()));
        match self.responses.lock().get(command) {
            Some(Ok(body)) => Ok(Bytes::from(body.clone())),
            Some(Err(message)) => Err(RequestError::Rpc {
                command: command.to_string(),
                message: message.clone(),
            }),
            None => Err(RequestError::Status {
                url: format!("mock://{service}/{command}"),
                status: 404,
            }),
        }
    }
}
