//! Websocket connection to the node daemon.
//!
//! A single background task owns the socket. It writes queued requests,
//! decodes inbound frames and hands them to the registered message
//! handler, and on connection loss runs the disconnect handlers, reconnects
//! at a fixed interval, replays the topic subscriptions and then runs the
//! reconnect handlers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use native_tls::{Identity, TlsConnector};
use parking_lot::{Mutex, RwLock};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{
    Connector, MaybeTlsStream, WebSocketStream, connect_async_tls_with_config,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::DaemonConfig;
use crate::error::TransportError;
use crate::types::{WebsocketRequest, WebsocketResponse};

use super::{LifecycleHandler, MessageHandler, StreamTransport};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Requests that may wait for the writer before new ones are dropped.
const OUTBOUND_CAPACITY: usize = 1024;

#[derive(Default)]
struct Handlers {
    message: Option<MessageHandler>,
    disconnect: Vec<LifecycleHandler>,
    reconnect: Vec<LifecycleHandler>,
}

struct Shared {
    cfg: DaemonConfig,
    connector: TlsConnector,
    handlers: RwLock<Handlers>,
    subscriptions: Mutex<Vec<String>>,
    connected: AtomicBool,
    cancel: CancellationToken,
}

/// Daemon websocket client implementing [`StreamTransport`].
pub struct WebsocketClient {
    shared: Arc<Shared>,
    outbound: mpsc::Sender<Message>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Queues `msg` for the writer without waiting.
fn queue(outbound: &mpsc::Sender<Message>, msg: Message) -> Result<(), TransportError> {
    outbound.try_send(msg).map_err(|e| match e {
        TrySendError::Full(_) => TransportError::QueueFull {
            capacity: outbound.max_capacity(),
        },
        TrySendError::Closed(_) => TransportError::Closed,
    })
}

fn tls_connector(cfg: &DaemonConfig) -> Result<TlsConnector, TransportError> {
    let mut builder = TlsConnector::builder();
    // The daemon serves a certificate from the node's private CA.
    builder
        .danger_accept_invalid_certs(true)
        .danger_accept_invalid_hostnames(true);

    if let Some(tls) = &cfg.tls {
        let cert = std::fs::read(&tls.cert_path)?;
        let key = std::fs::read(&tls.key_path)?;
        builder.identity(Identity::from_pkcs8(&cert, &key)?);
    }

    Ok(builder.build()?)
}

impl WebsocketClient {
    /// Connects to the daemon and starts the background connection task.
    ///
    /// Failing to establish the first connection is fatal and returned to
    /// the caller; later disconnects are retried in the background.
    pub async fn connect(cfg: &DaemonConfig) -> Result<Self, TransportError> {
        let shared = Arc::new(Shared {
            cfg: cfg.clone(),
            connector: tls_connector(cfg)?,
            handlers: RwLock::new(Handlers::default()),
            subscriptions: Mutex::new(Vec::new()),
            connected: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        });

        let ws = shared.open().await?;
        shared.connected.store(true, Ordering::SeqCst);
        info!(url = %cfg.url(), "connected to daemon websocket");

        let (outbound, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let task = tokio::spawn(Arc::clone(&shared).run(ws, rx));

        Ok(Self {
            shared,
            outbound,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    fn enqueue(&self, request: &WebsocketRequest) -> Result<(), TransportError> {
        if self.shared.cancel.is_cancelled() {
            return Err(TransportError::Closed);
        }
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let text = serde_json::to_string(request)?;
        queue(&self.outbound, Message::Text(text))
    }
}

impl Drop for WebsocketClient {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

impl Shared {
    async fn open(&self) -> Result<WsStream, TransportError> {
        let url = self.cfg.url();
        let connector = Connector::NativeTls(self.connector.clone());
        let connect = connect_async_tls_with_config(url.as_str(), None, false, Some(connector));

        match tokio::time::timeout(self.cfg.connect_timeout, connect).await {
            Ok(result) => {
                let (ws, _response) = result?;
                Ok(ws)
            }
            Err(_) => Err(TransportError::Timeout {
                url,
                timeout: self.cfg.connect_timeout,
            }),
        }
    }

    async fn run(self: Arc<Self>, mut ws: WsStream, mut outbound: mpsc::Receiver<Message>) {
        loop {
            if self.pump(&mut ws, &mut outbound).await {
                debug!("daemon websocket task stopped");
                return;
            }

            self.connected.store(false, Ordering::SeqCst);
            warn!("daemon websocket disconnected");
            self.notify(|h| &h.disconnect);

            // Requests queued for the dead connection are stale.
            while outbound.try_recv().is_ok() {}

            ws = match self.reconnect().await {
                Some(ws) => ws,
                None => return,
            };
            self.connected.store(true, Ordering::SeqCst);
            info!("daemon websocket reconnected");
            self.notify(|h| &h.reconnect);
        }
    }

    /// Drives one connection until it drops. Returns `true` when the client
    /// is shutting down rather than the connection being lost.
    async fn pump(
        &self,
        ws: &mut WsStream,
        outbound: &mut mpsc::Receiver<Message>,
    ) -> bool {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    if let Err(e) = ws.close(None).await {
                        debug!("closing daemon websocket: {e}");
                    }
                    return true;
                }
                msg = outbound.recv() => match msg {
                    Some(msg) => {
                        if let Err(e) = ws.send(msg).await {
                            warn!("writing to daemon websocket failed: {e}");
                            return false;
                        }
                    }
                    None => return true,
                },
                frame = ws.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        self.deliver(WebsocketResponse::from_json(&text).map_err(Into::into));
                    }
                    Some(Ok(Message::Binary(bin))) => {
                        let text = String::from_utf8_lossy(&bin);
                        self.deliver(WebsocketResponse::from_json(&text).map_err(Into::into));
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!(?frame, "daemon closed the websocket");
                        return false;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        self.deliver(Err(e.into()));
                        return false;
                    }
                    None => return false,
                },
            }
        }
    }

    async fn reconnect(&self) -> Option<WsStream> {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return None,
                _ = tokio::time::sleep(self.cfg.reconnect_interval) => {}
            }

            let mut ws = match self.open().await {
                Ok(ws) => ws,
                Err(e) => {
                    warn!("reconnecting to daemon failed: {e}");
                    continue;
                }
            };
            match self.resubscribe(&mut ws).await {
                Ok(()) => return Some(ws),
                Err(e) => warn!("re-subscribing after reconnect failed: {e}"),
            }
        }
    }

    async fn resubscribe(&self, ws: &mut WsStream) -> Result<(), TransportError> {
        let topics = self.subscriptions.lock().clone();
        for topic in topics {
            let req = WebsocketRequest::register_service(&self.cfg.service_name, &topic);
            ws.send(Message::Text(serde_json::to_string(&req)?)).await?;
        }
        Ok(())
    }

    fn deliver(&self, result: Result<WebsocketResponse, TransportError>) {
        let handler = self.handlers.read().message.clone();
        match handler {
            Some(handler) => handler(result),
            None => debug!("no message handler registered, dropping frame"),
        }
    }

    fn notify(&self, pick: impl Fn(&Handlers) -> &Vec<LifecycleHandler>) {
        // Clone out of the lock so handlers may call back into the client.
        let handlers = pick(&self.handlers.read()).clone();
        for handler in handlers {
            handler();
        }
    }
}

#[async_trait]
impl StreamTransport for WebsocketClient {
    async fn subscribe_self(&self) -> Result<(), TransportError> {
        let name = self.shared.cfg.service_name.clone();
        self.subscribe(&name).await
    }

    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        let req = WebsocketRequest::register_service(&self.shared.cfg.service_name, topic);
        self.enqueue(&req)?;

        let mut topics = self.shared.subscriptions.lock();
        if !topics.iter().any(|t| t == topic) {
            topics.push(topic.to_string());
        }
        Ok(())
    }

    fn add_handler(&self, handler: MessageHandler) -> Result<(), TransportError> {
        let mut handlers = self.shared.handlers.write();
        if handlers.message.is_some() {
            return Err(TransportError::HandlerAlreadyRegistered);
        }
        handlers.message = Some(handler);
        Ok(())
    }

    fn add_disconnect_handler(&self, handler: LifecycleHandler) {
        self.shared.handlers.write().disconnect.push(handler);
    }

    fn add_reconnect_handler(&self, handler: LifecycleHandler) {
        self.shared.handlers.write().reconnect.push(handler);
    }

    fn send(&self, request: WebsocketRequest) -> Result<(), TransportError> {
        self.enqueue(&request)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.shared.cancel.cancel();
        self.shared.connected.store(false, Ordering::SeqCst);

        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("daemon websocket task ended abnormally: {e}");
            }
        }
        Ok(())
    }
}
