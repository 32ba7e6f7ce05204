//! Per-service metric handlers.
//!
//! Every monitored service has one handler implementing [`ServiceMetrics`].
//! Handlers own their metrics outright; the dispatcher is the only caller
//! of their lifecycle methods. The closed set of handlers is the
//! [`ServiceHandler`] enum.
//!
//! All handlers process payloads the same way: decode the JSON payload for
//! the command, check its shape, update zero or more metrics. A payload
//! that fails to decode is logged once at error level and dropped without
//! touching any metric.

pub mod crawler;
pub mod farmer;
pub mod full_node;
pub mod harvester;
pub mod timelord;
pub mod wallet;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use prometheus::GaugeVec;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, warn};

use crate::config::ExporterConfig;
use crate::error::RegistryError;
use crate::file_log::FileLogger;
use crate::metrics::MetricsRegistry;
use crate::poller::Poller;
use crate::transport::{RequestTransport, StreamTransport};
use crate::types::{NodeType, NodeTypeRepr, Service, WebsocketRequest, WebsocketResponse};

pub use crawler::CrawlerMetrics;
pub use farmer::FarmerMetrics;
pub use full_node::FullNodeMetrics;
pub use harvester::HarvesterMetrics;
pub use timelord::TimelordMetrics;
pub use wallet::WalletMetrics;

/// Everything a handler needs besides its own metrics.
pub struct ServiceContext {
    pub registry: MetricsRegistry,
    pub config: ExporterConfig,
    pub file_log: FileLogger,
    stream: Arc<dyn StreamTransport>,
    requester: Option<Arc<dyn RequestTransport>>,
    poller: Poller,
}

impl ServiceContext {
    pub fn new(
        registry: MetricsRegistry,
        config: ExporterConfig,
        stream: Arc<dyn StreamTransport>,
        requester: Option<Arc<dyn RequestTransport>>,
    ) -> Self {
        let file_log = FileLogger::new(&config.file_log.root_path);
        Self {
            registry,
            config,
            file_log,
            stream,
            requester,
            poller: Poller::new(),
        }
    }

    pub fn stream(&self) -> &Arc<dyn StreamTransport> {
        &self.stream
    }

    pub fn poller(&self) -> &Poller {
        &self.poller
    }

    pub fn has_requester(&self) -> bool {
        self.requester.is_some()
    }

    /// Asks `service` for `command` over the stream. The answer arrives
    /// later as an event; this never waits on the network.
    pub fn request(&self, service: Service, command: &str, data: serde_json::Value) {
        let request = WebsocketRequest::new(
            self.config.daemon.service_name.as_str(),
            service.origin(self.registry.namespace()),
            command,
            data,
        );
        if let Err(e) = self.stream.send(request) {
            warn!(%service, command, "could not send request: {e}");
        }
    }

    /// Polls `command` on `service` every `period` through the request
    /// transport and feeds each successful response to `on_response`.
    ///
    /// Returns `false` without scheduling anything when no request
    /// transport is available.
    pub fn poll<F>(&self, service: Service, command: &'static str, period: Duration, on_response: F) -> bool
    where
        F: Fn(&Bytes) + Send + Sync + 'static,
    {
        let Some(requester) = self.requester.clone() else {
            info!(%service, command, "request transport unavailable, polling disabled");
            return false;
        };

        let on_response = Arc::new(on_response);
        self.poller.every(command, period, move || {
            let requester = Arc::clone(&requester);
            let on_response = Arc::clone(&on_response);
            async move {
                match requester
                    .request(service, command, serde_json::json!({}))
                    .await
                {
                    Ok(body) => on_response(&body),
                    Err(e) => warn!(%service, command, "poll failed, keeping previous values: {e}"),
                }
            }
        });
        true
    }
}

/// Capability set shared by every service handler.
pub trait ServiceMetrics: Send + Sync {
    /// Declares every metric the service may emit. Called once at startup,
    /// before the stream is opened.
    fn init_metrics(ctx: Arc<ServiceContext>) -> Result<Self, RegistryError>
    where
        Self: Sized;

    /// Requests current state right after the stream subscription succeeds.
    fn initial_data(&self);

    /// Schedules recurring pulls for data with no push event.
    fn setup_polling_metrics(&self);

    /// Handles one event from this service. Unknown commands are ignored.
    fn receive_response(&self, resp: &WebsocketResponse);

    /// The stream dropped: zero current-state gauges, keep counters.
    fn disconnected(&self);

    /// The stream is back: resynchronise current state.
    fn reconnected(&self);
}

/// One handler per monitored service.
pub enum ServiceHandler {
    FullNode(FullNodeMetrics),
    Wallet(WalletMetrics),
    Crawler(CrawlerMetrics),
    Timelord(TimelordMetrics),
    Harvester(HarvesterMetrics),
    Farmer(FarmerMetrics),
}

macro_rules! delegate {
    ($self:ident, $h:ident => $body:expr) => {
        match $self {
            ServiceHandler::FullNode($h) => $body,
            ServiceHandler::Wallet($h) => $body,
            ServiceHandler::Crawler($h) => $body,
            ServiceHandler::Timelord($h) => $body,
            ServiceHandler::Harvester($h) => $body,
            ServiceHandler::Farmer($h) => $body,
        }
    };
}

impl ServiceHandler {
    /// Builds the handler for `service` and declares its metrics.
    pub fn init(service: Service, ctx: Arc<ServiceContext>) -> Result<Self, RegistryError> {
        Ok(match service {
            Service::FullNode => ServiceHandler::FullNode(FullNodeMetrics::init_metrics(ctx)?),
            Service::Wallet => ServiceHandler::Wallet(WalletMetrics::init_metrics(ctx)?),
            Service::Crawler => ServiceHandler::Crawler(CrawlerMetrics::init_metrics(ctx)?),
            Service::Timelord => ServiceHandler::Timelord(TimelordMetrics::init_metrics(ctx)?),
            Service::Harvester => ServiceHandler::Harvester(HarvesterMetrics::init_metrics(ctx)?),
            Service::Farmer => ServiceHandler::Farmer(FarmerMetrics::init_metrics(ctx)?),
        })
    }

    pub fn service(&self) -> Service {
        match self {
            ServiceHandler::FullNode(_) => Service::FullNode,
            ServiceHandler::Wallet(_) => Service::Wallet,
            ServiceHandler::Crawler(_) => Service::Crawler,
            ServiceHandler::Timelord(_) => Service::Timelord,
            ServiceHandler::Harvester(_) => Service::Harvester,
            ServiceHandler::Farmer(_) => Service::Farmer,
        }
    }

    pub fn initial_data(&self) {
        delegate!(self, h => h.initial_data())
    }

    pub fn setup_polling_metrics(&self) {
        delegate!(self, h => h.setup_polling_metrics())
    }

    pub fn receive_response(&self, resp: &WebsocketResponse) {
        delegate!(self, h => h.receive_response(resp))
    }

    pub fn disconnected(&self) {
        delegate!(self, h => h.disconnected())
    }

    pub fn reconnected(&self) {
        delegate!(self, h => h.reconnected())
    }
}

/// Decodes a payload, logging and returning `None` if it is malformed.
pub(crate) fn parse_payload<T: DeserializeOwned>(resp: &WebsocketResponse) -> Option<T> {
    parse_body(&resp.origin, &resp.command, &resp.data)
}

pub(crate) fn parse_body<T: DeserializeOwned>(origin: &str, command: &str, body: &[u8]) -> Option<T> {
    match serde_json::from_slice(body) {
        Ok(payload) => Some(payload),
        Err(e) => {
            error!(origin, command, "error unmarshalling payload: {e}");
            None
        }
    }
}

/// Converts a JSON boolean into a gauge value.
pub(crate) fn bool_gauge(value: bool) -> f64 {
    if value { 1.0 } else { 0.0 }
}

/// A single-label gauge family whose label set is replaced wholesale on
/// every update.
///
/// New values are written before vanished labels are removed, so a
/// concurrent scrape sees either the old or the new value of a label that
/// survives the update, never a gap.
pub(crate) struct ReplacedGaugeVec {
    gauges: GaugeVec,
    labels: Mutex<HashSet<String>>,
}

impl ReplacedGaugeVec {
    pub fn new(gauges: GaugeVec) -> Self {
        Self {
            gauges,
            labels: Mutex::new(HashSet::new()),
        }
    }

    pub fn replace(&self, values: impl IntoIterator<Item = (String, f64)>) {
        let mut labels = self.labels.lock();
        let mut current = HashSet::new();
        for (label, value) in values {
            self.gauges.with_label_values(&[label.as_str()]).set(value);
            current.insert(label);
        }
        for stale in labels.difference(&current) {
            if let Err(e) = self.gauges.remove_label_values(&[stale.as_str()]) {
                debug!(label = %stale, "stale label already gone: {e}");
            }
        }
        *labels = current;
    }
}

#[derive(Debug, Deserialize)]
struct Connection {
    #[serde(rename = "type")]
    node_type: NodeTypeRepr,
}

#[derive(Debug, Deserialize)]
struct ConnectionsPayload {
    #[serde(default)]
    connections: Option<Vec<Connection>>,
}

#[derive(Debug, Deserialize)]
struct DebugPayload {
    data: HashMap<String, f64>,
}

/// Metrics every service exports: peer connection counts by node type and
/// free-form debug values.
#[derive(Clone)]
pub struct CommonMetrics {
    pub connection_count: GaugeVec,
    pub debug: GaugeVec,
}

impl CommonMetrics {
    pub fn new(registry: &MetricsRegistry, service: Service) -> Result<Self, RegistryError> {
        Ok(Self {
            connection_count: registry.new_gauge_vec(
                service,
                "connection_count",
                "Number of active connections for each type of peer",
                &["type"],
            )?,
            debug: registry.new_gauge_vec(
                service,
                "debug_metrics",
                "Arbitrary numeric debug values reported by the service",
                &["key"],
            )?,
        })
    }

    /// Handles the commands shared by all services. Returns `true` when
    /// `resp` was one of them.
    pub fn receive(&self, resp: &WebsocketResponse) -> bool {
        match resp.command.as_str() {
            "get_connections" => {
                self.update_connections(resp);
                true
            }
            "debug" => {
                self.update_debug(resp);
                true
            }
            _ => false,
        }
    }

    /// Sets `connection_count` from a connection list. Every known node
    /// type is written, so types with no peers read 0.
    fn update_connections(&self, resp: &WebsocketResponse) {
        let Some(payload) = parse_payload::<ConnectionsPayload>(resp) else {
            return;
        };

        let mut counts: HashMap<NodeType, f64> = HashMap::new();
        for conn in payload.connections.iter().flatten() {
            match conn.node_type.resolve() {
                Some(node_type) => *counts.entry(node_type).or_default() += 1.0,
                None => debug!(origin = %resp.origin, node_type = ?conn.node_type, "ignoring unknown node type"),
            }
        }

        for node_type in NodeType::ALL {
            self.connection_count
                .with_label_values(&[node_type.label()])
                .set(counts.get(&node_type).copied().unwrap_or(0.0));
        }
    }

    /// Passes `{"data": {key: number}}` through as `debug_metrics{key}`.
    fn update_debug(&self, resp: &WebsocketResponse) {
        let Some(payload) = parse_payload::<DebugPayload>(resp) else {
            return;
        };
        for (key, value) in payload.data {
            self.debug.with_label_values(&[key.as_str()]).set(value);
        }
    }

    /// Zeroes every connection count. Idempotent.
    pub fn reset_connections(&self) {
        for node_type in NodeType::ALL {
            self.connection_count
                .with_label_values(&[node_type.label()])
                .set(0.0);
        }
    }
}


#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    use super::test_support::harness;
    use super::*;
    use crate::metrics::test_util::sample;
    use crate::transport::mock::event;

    fn common() -> (MetricsRegistry, CommonMetrics) {
        let registry = MetricsRegistry::new("chik");
        let common = CommonMetrics::new(&registry, Service::FullNode).expect("metrics");
        (registry, common)
    }

    fn connections(text: &str, node_type: &str) -> Option<f64> {
        sample(
            text,
            &format!(r#"chik_full_node_connection_count{{type="{node_type}"}}"#),
        )
    }

    #[test]
    fn connection_counts_cover_every_node_type() {
        let (registry, common) = common();
        let resp = event(
            "chik_full_node",
            "get_connections",
            r#"{"connections":[{"type":"wallet"},{"type":"wallet"},{"type":"farmer"}]}"#,
        );
        assert!(common.receive(&resp));

        let text = registry.snapshot();
        assert_eq!(connections(&text, "wallet"), Some(2.0));
        assert_eq!(connections(&text, "farmer"), Some(1.0));
        for other in ["full_node", "harvester", "timelord", "introducer"] {
            assert_eq!(connections(&text, other), Some(0.0), "{other}");
        }
    }

    #[test]
    fn numeric_node_types_and_unknown_types() {
        let (registry, common) = common();
        let resp = event(
            "chik_full_node",
            "get_connections",
            r#"{"connections":[{"type":1},{"type":1},{"type":1},{"type":2},{"type":9}],"success":true}"#,
        );
        common.receive(&resp);

        let text = registry.snapshot();
        assert_eq!(connections(&text, "full_node"), Some(3.0));
        assert_eq!(connections(&text, "harvester"), Some(1.0));
        assert_eq!(connections(&text, "wallet"), Some(0.0));
    }

    #[test]
    fn missing_connection_list_reads_as_zero() {
        let (registry, common) = common();
        common.receive(&event("chik_full_node", "get_connections", r#"{"success":true}"#));
        assert_eq!(connections(&registry.snapshot(), "full_node"), Some(0.0));
    }

    #[test]
    fn debug_values_pass_through_by_key() {
        let (registry, common) = common();
        common.receive(&event("chik_full_node", "debug", r#"{"data":{"foo":3.5}}"#));

        let text = registry.snapshot();
        assert_eq!(
            sample(&text, r#"chik_full_node_debug_metrics{key="foo"}"#),
            Some(3.5)
        );
        assert!(!text.contains(r#"key="bar""#));
    }

    #[traced_test]
    #[test]
    fn malformed_payload_keeps_values_and_logs_once() {
        let (registry, common) = common();
        common.receive(&event(
            "chik_full_node",
            "get_connections",
            r#"{"connections":[{"type":"wallet"}]}"#,
        ));
        let before = registry.snapshot();

        common.receive(&event(
            "chik_full_node",
            "get_connections",
            r#"{"connections":[{"type":"wal"#,
        ));

        assert_eq!(registry.snapshot(), before);
        logs_assert(|lines: &[&str]| {
            match lines
                .iter()
                .filter(|line| line.contains("ERROR") && line.contains("error unmarshalling payload"))
                .count()
            {
                1 => Ok(()),
                n => Err(format!("expected exactly one error log, found {n}")),
            }
        });
    }

    #[test]
    fn reset_connections_is_idempotent() {
        let (registry, common) = common();
        common.receive(&event(
            "chik_full_node",
            "get_connections",
            r#"{"connections":[{"type":"farmer"}]}"#,
        ));

        common.reset_connections();
        let once = registry.snapshot();
        common.reset_connections();
        assert_eq!(registry.snapshot(), once);
        assert_eq!(connections(&once, "farmer"), Some(0.0));
    }

    #[test]
    fn replaced_family_drops_vanished_labels_only() {
        let registry = MetricsRegistry::new("chik");
        let family = ReplacedGaugeVec::new(
            registry
                .new_gauge_vec(Service::Crawler, "peer_version", "Peers by version", &["version"])
                .expect("vec"),
        );

        family.replace([("1.8.0".to_string(), 5.0), ("1.7.1".to_string(), 3.0)]);
        family.replace([("1.8.0".to_string(), 6.0)]);

        let text = registry.snapshot();
        assert_eq!(sample(&text, r#"chik_crawler_peer_version{version="1.8.0"}"#), Some(6.0));
        assert!(!text.contains("1.7.1"));

        family.replace(Vec::<(String, f64)>::new());
        assert!(!registry.snapshot().contains("chik_crawler_peer_version"));
    }

    #[test]
    fn unrelated_commands_are_not_consumed() {
        let (_registry, common) = common();
        assert!(!common.receive(&event("chik_full_node", "block", "{}")));
    }

    #[test]
    fn requests_are_addressed_to_the_service_origin() {
        let h = harness();
        h.ctx.request(Service::Wallet, "get_sync_status", serde_json::json!({}));

        let sent = h.stream.sent_requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].destination, "chik_wallet");
        assert_eq!(sent[0].origin, "chik_exporter");
        assert_eq!(sent[0].command, "get_sync_status");
    }
}
