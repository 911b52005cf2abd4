//! Server lifecycle events and the sinks that receive them.
//!
//! The server never calls observers directly. It emits a [`ServerEvent`]
//! into whatever [`EventSink`] it was built with: [`TracingSink`] to log,
//! [`EventBus`] to fan out over a broadcast channel, or [`Fanout`] to do both.

use std::net::SocketAddr;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::types::{Request, Response};

/// Default capacity of an [`EventBus`] channel.
pub const DEFAULT_BUS_CAPACITY: usize = 256;

/// Which transport a request arrived on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Single-shot HTTP POST.
    Http,
    /// Persistent WebSocket connection.
    WebSocket,
}

/// Raw transport context attached to requests and events.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportContext {
    /// Transport the request came in on.
    pub kind: TransportKind,
    /// Remote address, when known.
    pub peer: Option<SocketAddr>,
    /// WebSocket connection id.
    pub connection_id: Option<String>,
    /// The owning session has already been authenticated.
    pub authenticated: bool,
}

impl TransportContext {
    /// Context for an HTTP request.
    pub fn http(peer: Option<SocketAddr>) -> Self {
        Self {
            kind: TransportKind::Http,
            peer,
            connection_id: None,
            authenticated: false,
        }
    }

    /// Context for a message on a WebSocket connection.
    pub fn websocket(
        connection_id: impl Into<String>,
        peer: Option<SocketAddr>,
        authenticated: bool,
    ) -> Self {
        Self {
            kind: TransportKind::WebSocket,
            peer,
            connection_id: Some(connection_id.into()),
            authenticated,
        }
    }
}

/// Something observers may want to know about.
#[derive(Clone, Debug)]
pub enum ServerEvent {
    /// A WebSocket client connected.
    Connect {
        /// Connection details.
        transport: TransportContext,
    },
    /// A request was decoded and is about to be dispatched.
    Request {
        /// The parsed request.
        request: Request,
        /// Where it came from.
        transport: TransportContext,
    },
    /// A response was written to the transport.
    Response {
        /// The response sent.
        response: Response,
        /// Where it went.
        transport: TransportContext,
    },
    /// Something went wrong that the caller may not see.
    Error {
        /// What happened.
        description: String,
        /// Request being processed, if any.
        request: Option<Request>,
        /// Offending raw payload, for decode failures.
        raw: Option<String>,
        /// Transport involved, if any.
        transport: Option<TransportContext>,
    },
}

impl ServerEvent {
    /// A bare error event.
    pub fn error(description: impl Into<String>) -> Self {
        Self::Error {
            description: description.into(),
            request: None,
            raw: None,
            transport: None,
        }
    }

    /// Attach the request to an error event.
    #[must_use]
    pub fn with_request(mut self, req: Request) -> Self {
        if let Self::Error { request, .. } = &mut self {
            *request = Some(req);
        }
        self
    }

    /// Attach the raw payload to an error event.
    #[must_use]
    pub fn with_raw(mut self, payload: impl Into<String>) -> Self {
        if let Self::Error { raw, .. } = &mut self {
            *raw = Some(payload.into());
        }
        self
    }

    /// Attach the transport to an error event.
    #[must_use]
    pub fn with_transport(mut self, ctx: TransportContext) -> Self {
        if let Self::Error { transport, .. } = &mut self {
            *transport = Some(ctx);
        }
        self
    }

    /// Event name: `connect`, `request`, `response`, or `error`.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::Request { .. } => "request",
            Self::Response { .. } => "response",
            Self::Error { .. } => "error",
        }
    }
}

/// Receives server events.
pub trait EventSink: Send + Sync {
    /// Deliver one event. Must not block.
    fn emit(&self, event: ServerEvent);
}

/// Writes every event to the `tracing` log.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: ServerEvent) {
        match event {
            ServerEvent::Connect { transport } => {
                info!(peer = ?transport.peer, connection_id = ?transport.connection_id, "client connected");
            }
            ServerEvent::Request { request, transport } => {
                debug!(
                    transport = ?transport.kind,
                    id = ?request.id,
                    domain = request.domain,
                    verb = request.verb,
                    "client request"
                );
            }
            ServerEvent::Response { response, transport } => {
                debug!(
                    transport = ?transport.kind,
                    id = ?response.id,
                    is_error = response.is_error(),
                    "server response"
                );
            }
            ServerEvent::Error {
                description,
                request,
                raw,
                ..
            } => {
                warn!(
                    verb = request.as_ref().map(|r| r.verb.as_str()),
                    raw = raw.as_deref(),
                    "server error: {description}"
                );
            }
        }
    }
}

/// Broadcasts events to any number of subscribers.
///
/// Events emitted while nobody is subscribed are dropped. Slow subscribers
/// lag and lose the oldest events.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<ServerEvent>,
}

impl EventBus {
    /// Create a bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.tx.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

impl EventSink for EventBus {
    fn emit(&self, event: ServerEvent) {
        let _ = self.tx.send(event);
    }
}

/// Forwards each event to several sinks in order.
#[derive(Clone, Default)]
pub struct Fanout {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl Fanout {
    /// Empty fan-out.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink.
    #[must_use]
    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for Fanout {
    fn emit(&self, event: ServerEvent) {
        let Some((last, rest)) = self.sinks.split_last() else {
            return;
        };
        for sink in rest {
            sink.emit(event.clone());
        }
        last.emit(event);
    }
}
