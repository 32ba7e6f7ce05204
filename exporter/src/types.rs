//! Domain types shared by the transports, the dispatcher and the service
//! handlers: the closed set of monitored services, node types, and the
//! daemon's websocket message envelope.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

/// A monitored node subsystem.
///
/// This is a closed enumeration: supporting a new subsystem means adding a
/// variant here and a handler in [`crate::services`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Service {
    FullNode,
    Wallet,
    Crawler,
    Timelord,
    Harvester,
    Farmer,
}

impl Service {
    /// Every service, in a stable order.
    pub const ALL: [Service; 6] = [
        Service::FullNode,
        Service::Wallet,
        Service::Crawler,
        Service::Timelord,
        Service::Harvester,
        Service::Farmer,
    ];

    /// Subsystem name used in metric names and origin tags.
    pub fn as_str(&self) -> &'static str {
        match self {
            Service::FullNode => "full_node",
            Service::Wallet => "wallet",
            Service::Crawler => "crawler",
            Service::Timelord => "timelord",
            Service::Harvester => "harvester",
            Service::Farmer => "farmer",
        }
    }

    /// Origin tag the daemon uses for this service, e.g. `chik_full_node`.
    pub fn origin(&self, namespace: &str) -> String {
        format!("{namespace}_{}", self.as_str())
    }

    /// Resolves an origin tag back to a service, if it names one we monitor.
    pub fn from_origin(namespace: &str, origin: &str) -> Option<Service> {
        let name = origin.strip_prefix(namespace)?.strip_prefix('_')?;
        Service::ALL.into_iter().find(|s| s.as_str() == name)
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Peer node types as reported in connection lists.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeType {
    FullNode = 1,
    Harvester = 2,
    Farmer = 3,
    Timelord = 4,
    Introducer = 5,
    Wallet = 6,
}

impl NodeType {
    pub const ALL: [NodeType; 6] = [
        NodeType::FullNode,
        NodeType::Harvester,
        NodeType::Farmer,
        NodeType::Timelord,
        NodeType::Introducer,
        NodeType::Wallet,
    ];

    /// Label value used for the `type` label of connection gauges.
    pub fn label(&self) -> &'static str {
        match self {
            NodeType::FullNode => "full_node",
            NodeType::Harvester => "harvester",
            NodeType::Farmer => "farmer",
            NodeType::Timelord => "timelord",
            NodeType::Introducer => "introducer",
            NodeType::Wallet => "wallet",
        }
    }

    pub fn from_code(code: i64) -> Option<NodeType> {
        NodeType::ALL.into_iter().find(|t| *t as i64 == code)
    }

    pub fn from_label(label: &str) -> Option<NodeType> {
        NodeType::ALL.into_iter().find(|t| t.label() == label)
    }
}

/// A node type as it appears on the wire: the daemon sends numeric codes,
/// some tooling sends the snake_case name.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum NodeTypeRepr {
    Code(i64),
    Name(String),
}

impl NodeTypeRepr {
    /// Returns the known node type, or `None` for values we don't track.
    pub fn resolve(&self) -> Option<NodeType> {
        match self {
            NodeTypeRepr::Code(code) => NodeType::from_code(*code),
            NodeTypeRepr::Name(name) => NodeType::from_label(name),
        }
    }
}

/// An event received from the daemon's websocket.
///
/// `data` is kept as raw JSON bytes; only the receiving service handler
/// knows its shape for a given command.
#[derive(Clone, Debug, PartialEq)]
pub struct WebsocketResponse {
    pub command: String,
    pub ack: bool,
    pub data: Bytes,
    pub request_id: String,
    pub destination: String,
    pub origin: String,
}

#[derive(Deserialize)]
struct RawEnvelope<'a> {
    command: String,
    #[serde(default)]
    ack: bool,
    #[serde(borrow, default)]
    data: Option<&'a RawValue>,
    #[serde(default)]
    request_id: String,
    #[serde(default)]
    destination: String,
    #[serde(default)]
    origin: String,
}

impl WebsocketResponse {
    /// Decodes a websocket text frame into an event envelope.
    ///
    /// Only the envelope is validated here; a missing `data` field is kept
    /// as JSON `null` and left for the handler to reject.
    pub fn from_json(frame: &str) -> Result<Self, serde_json::Error> {
        let raw: RawEnvelope<'_> = serde_json::from_str(frame)?;
        let data = raw
            .data
            .map(|d| Bytes::copy_from_slice(d.get().as_bytes()))
            .unwrap_or_else(|| Bytes::from_static(b"null"));

        Ok(Self {
            command: raw.command,
            ack: raw.ack,
            data,
            request_id: raw.request_id,
            destination: raw.destination,
            origin: raw.origin,
        })
    }
}

/// A request sent to the daemon over the websocket.
///
/// Responses to these come back asynchronously as [`WebsocketResponse`]
/// events with the same `command`.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct WebsocketRequest {
    pub command: String,
    pub ack: bool,
    pub data: serde_json::Value,
    pub request_id: String,
    pub destination: String,
    pub origin: String,
}

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

impl WebsocketRequest {
    pub fn new(
        origin: impl Into<String>,
        destination: impl Into<String>,
        command: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        let id = NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            command: command.into(),
            ack: false,
            data,
            request_id: format!("{id:016x}"),
            destination: destination.into(),
            origin: origin.into(),
        }
    }

    /// `register_service` request subscribing `origin` to `service` events.
    pub fn register_service(origin: &str, service: &str) -> Self {
        Self::new(
            origin,
            "daemon",
            "register_service",
            serde_json::json!({ "service": service }),
        )
    }
}
