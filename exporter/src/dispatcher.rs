//! Event routing between the daemon stream and the service handlers.
//!
//! The [`Dispatcher`] owns the single stream subscription and the table of
//! service handlers, and is the only caller of their lifecycle methods.
//! Events are routed by origin tag (`<namespace>_<service>`); anything else
//! is ignored.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use tracing::{debug, error, info, trace, warn};

use crate::config::ExporterConfig;
use crate::error::{RegistryError, TransportError};
use crate::metrics::MetricsRegistry;
use crate::services::{ServiceContext, ServiceHandler};
use crate::transport::{RequestTransport, StreamTransport};
use crate::types::{Service, WebsocketResponse};

/// Topic carrying every service's metrics events.
const METRICS_TOPIC: &str = "metrics";

pub struct Dispatcher {
    ctx: Arc<ServiceContext>,
    handlers: HashMap<Service, ServiceHandler>,
}

impl Dispatcher {
    /// Builds one handler per service and declares all of their metrics.
    ///
    /// Fails if any metric identity is already registered in `registry`.
    pub fn new(
        registry: MetricsRegistry,
        config: ExporterConfig,
        stream: Arc<dyn StreamTransport>,
        requester: Option<Arc<dyn RequestTransport>>,
    ) -> Result<Arc<Self>, RegistryError> {
        let ctx = Arc::new(ServiceContext::new(registry, config, stream, requester));
        let handlers = Service::ALL
            .into_iter()
            .map(|service| Ok((service, ServiceHandler::init(service, Arc::clone(&ctx))?)))
            .collect::<Result<HashMap<_, _>, RegistryError>>()?;

        Ok(Arc::new(Self { ctx, handlers }))
    }

    pub fn context(&self) -> &Arc<ServiceContext> {
        &self.ctx
    }

    pub fn handler(&self, service: Service) -> Option<&ServiceHandler> {
        self.handlers.get(&service)
    }

    /// Hooks the dispatcher into the stream, subscribes, then asks every
    /// handler for its initial data and starts its polling timers.
    pub async fn open_stream(self: &Arc<Self>) -> Result<(), TransportError> {
        let stream = self.ctx.stream();

        // Callbacks hold a weak reference: the stream is owned by the
        // dispatcher's context and must not keep it alive.
        let weak = Arc::downgrade(self);
        stream.add_handler(Arc::new(
            move |result: Result<WebsocketResponse, TransportError>| {
                with_dispatcher(&weak, |d| d.receive(result));
            },
        ))?;
        let weak = Arc::downgrade(self);
        stream.add_disconnect_handler(Arc::new(move || with_dispatcher(&weak, |d| d.disconnected())));
        let weak = Arc::downgrade(self);
        stream.add_reconnect_handler(Arc::new(move || with_dispatcher(&weak, |d| d.reconnected())));

        stream.subscribe_self().await?;
        stream.subscribe(METRICS_TOPIC).await?;
        info!(topic = METRICS_TOPIC, "subscribed to daemon events");

        for handler in self.handlers.values() {
            handler.initial_data();
            handler.setup_polling_metrics();
        }
        Ok(())
    }

    /// Routes one inbound frame to the handler for its origin.
    pub fn receive(&self, result: Result<WebsocketResponse, TransportError>) {
        let resp = match result {
            Ok(resp) => resp,
            Err(e) => {
                error!("websocket receive error: {e}");
                return;
            }
        };

        debug!(
            origin = %resp.origin,
            command = %resp.command,
            destination = %resp.destination,
            "received event"
        );
        trace!(payload = %String::from_utf8_lossy(&resp.data), "event payload");

        let handler = Service::from_origin(self.ctx.registry.namespace(), &resp.origin)
            .and_then(|service| self.handlers.get(&service));
        match handler {
            Some(handler) => handler.receive_response(&resp),
            None => debug!(origin = %resp.origin, "no handler for origin, ignoring"),
        }
    }

    pub fn disconnected(&self) {
        warn!("daemon stream disconnected, zeroing connection counts");
        self.handlers.values().for_each(ServiceHandler::disconnected);
    }

    pub fn reconnected(&self) {
        info!("daemon stream reconnected, refreshing state");
        self.handlers.values().for_each(ServiceHandler::reconnected);
    }

    /// Stops all polling timers and closes the stream subscription.
    pub async fn close(&self) -> Result<(), TransportError> {
        self.ctx.poller().shutdown().await;
        self.ctx.stream().close().await
    }
}

fn with_dispatcher(weak: &Weak<Dispatcher>, f: impl FnOnce(&Dispatcher)) {
    match weak.upgrade() {
        Some(dispatcher) => f(&dispatcher),
        None => debug!("dispatcher dropped, ignoring stream callback"),
    }
}
