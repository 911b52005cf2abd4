//! Server context handed to backends at setup.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use serde_json::{Map, Value};

use crate::backend::DomainHandler;
use crate::events::{EventSink, ServerEvent, TracingSink};

/// Mounted backends keyed by domain name.
pub type DomainTable = HashMap<String, Arc<dyn DomainHandler>>;

/// What a backend knows about the server that owns it.
#[derive(Clone)]
pub struct ServerContext {
    host: String,
    port: u16,
    env: Arc<Map<String, Value>>,
    events: Arc<dyn EventSink>,
    domains: Weak<DomainTable>,
}

impl ServerContext {
    /// Build a context for a running server.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        env: Arc<Map<String, Value>>,
        events: Arc<dyn EventSink>,
        domains: &Arc<DomainTable>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            env,
            events,
            domains: Arc::downgrade(domains),
        }
    }

    /// A context not attached to any server; events go to the log.
    pub fn detached() -> Self {
        Self {
            host: String::new(),
            port: 0,
            env: Arc::new(Map::new()),
            events: Arc::new(TracingSink),
            domains: Weak::new(),
        }
    }

    /// Replace the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Host the server is bound to.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port the server is bound to.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Pass-through environment bag from the server configuration.
    pub fn env(&self) -> &Map<String, Value> {
        &self.env
    }

    /// One value from the environment bag.
    pub fn env_value(&self, key: &str) -> Option<&Value> {
        self.env.get(key)
    }

    /// Emit a server event.
    pub fn emit(&self, event: ServerEvent) {
        self.events.emit(event);
    }

    /// Another mounted domain, for cross-backend introspection.
    ///
    /// Returns `None` once the server has been dropped.
    pub fn domain(&self, name: &str) -> Option<Arc<dyn DomainHandler>> {
        self.domains.upgrade()?.get(name).cloned()
    }
}

impl std::fmt::Debug for ServerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerContext")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("env", &self.env)
            .finish_non_exhaustive()
    }
}
