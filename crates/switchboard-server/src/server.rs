//! `RpcServer`: one transport, one dispatcher, a set of mounted domains.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use switchboard_rpc::{
    Backend, BackendHandler, DomainHandler, DomainTable, EventSink, ServerContext, TransportKind,
};
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::auth::{ApiKeyAuthenticator, Authenticator};
use crate::config::ServerConfig;
use crate::dispatch::Dispatcher;
use crate::errors::ServerError;
use crate::shutdown::{DEFAULT_SHUTDOWN_TIMEOUT, TaskGroup};
use crate::websocket::SessionTable;
use crate::websocket::heartbeat::run_heartbeat;
use crate::{http, websocket};

/// Shared state handed to every Axum handler.
#[derive(Clone)]
pub struct AppState {
    /// Request dispatcher.
    pub dispatcher: Arc<Dispatcher>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Open WebSocket sessions (always empty over HTTP).
    pub sessions: Arc<SessionTable>,
}

struct Running {
    addr: SocketAddr,
    tasks: TaskGroup,
}

/// An RPC server on a single transport.
pub struct RpcServer {
    transport: TransportKind,
    config: ServerConfig,
    events: Arc<dyn EventSink>,
    auth: Arc<dyn Authenticator>,
    domains: Vec<(String, Arc<dyn DomainHandler>)>,
    table: Option<Arc<DomainTable>>,
    initialized: usize,
    sessions: Arc<SessionTable>,
    running: Option<Running>,
}

impl RpcServer {
    /// Create a server. The API key gate is built from `config.api_keys`.
    pub fn new(transport: TransportKind, config: ServerConfig, events: Arc<dyn EventSink>) -> Self {
        let auth = Arc::new(ApiKeyAuthenticator::new(config.api_keys.clone()));
        Self {
            transport,
            config,
            events,
            auth,
            domains: Vec::new(),
            table: None,
            initialized: 0,
            sessions: Arc::new(SessionTable::new()),
            running: None,
        }
    }

    /// A server answering HTTP POST requests.
    pub fn http(config: ServerConfig, events: Arc<dyn EventSink>) -> Self {
        Self::new(TransportKind::Http, config, events)
    }

    /// A server accepting WebSocket connections.
    pub fn websocket(config: ServerConfig, events: Arc<dyn EventSink>) -> Self {
        Self::new(TransportKind::WebSocket, config, events)
    }

    /// Replace the authentication hook.
    #[must_use]
    pub fn with_authenticator(mut self, auth: Arc<dyn Authenticator>) -> Self {
        self.auth = auth;
        self
    }

    /// Mount a backend under `name` with default options.
    pub fn add_backend<H: Backend>(&mut self, name: &str, backend: H) -> Result<(), ServerError> {
        let handler = BackendHandler::new(backend)?;
        self.add_domain(name, Arc::new(handler))
    }

    /// Mount any domain handler under `name`.
    ///
    /// Names must be non-empty and unique. Domains are frozen once
    /// [`start`](Self::start) has run.
    pub fn add_domain(
        &mut self,
        name: &str,
        handler: Arc<dyn DomainHandler>,
    ) -> Result<(), ServerError> {
        if name.is_empty() {
            return Err(ServerError::EmptyDomainName);
        }
        if self.table.is_some() {
            return Err(ServerError::DomainsFrozen(name.to_owned()));
        }
        if self.domains.iter().any(|(existing, _)| existing == name) {
            return Err(ServerError::DuplicateDomain(name.to_owned()));
        }
        debug!(domain = name, verbs = ?handler.verbs(), "domain mounted");
        self.domains.push((name.to_owned(), handler));
        Ok(())
    }

    /// Bind, set up backends (first start only) and start serving.
    ///
    /// Returns the bound address.
    pub async fn start(&mut self) -> Result<SocketAddr, ServerError> {
        if self.running.is_some() {
            return Err(ServerError::AlreadyRunning);
        }

        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port))
            .await
            .map_err(|source| ServerError::Bind {
                addr: format!("{}:{}", self.config.host, self.config.port),
                source,
            })?;
        let addr = listener.local_addr().map_err(|source| ServerError::Bind {
            addr: format!("{}:{}", self.config.host, self.config.port),
            source,
        })?;

        let table = self.ensure_initialized(addr.port()).await?;
        let dispatcher = Dispatcher::new(table, Arc::clone(&self.auth), Arc::clone(&self.events));
        let state = AppState {
            dispatcher: Arc::new(dispatcher),
            config: Arc::new(self.config.clone()),
            sessions: Arc::clone(&self.sessions),
        };

        let mut tasks = TaskGroup::new();

        let app = router_for(self.transport, state);
        tasks.spawn("accept", |cancel| async move {
            let service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, service)
                .with_graceful_shutdown(cancel.cancelled_owned())
                .await
            {
                error!(error = %e, "accept loop failed");
            }
        });

        if self.transport == TransportKind::WebSocket {
            let sessions = Arc::clone(&self.sessions);
            let interval = self.config.heartbeat_interval();
            tasks.spawn("heartbeat", |cancel| async move {
                let stats = run_heartbeat(sessions, interval, cancel).await;
                debug!(sweeps = stats.sweeps, reaped = stats.reaped, "heartbeat stopped");
            });
        }

        info!(transport = ?self.transport, %addr, "rpc server listening");
        self.running = Some(Running { addr, tasks });
        Ok(addr)
    }

    /// Stop serving: cancel the accept loop and heartbeat, close every
    /// session and wait for the tasks. No-op when not running.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        running.tasks.cancel();
        let closed = self.sessions.close_all();
        let aborted = running.tasks.stop(DEFAULT_SHUTDOWN_TIMEOUT).await;
        info!(addr = %running.addr, closed_sessions = closed, ?aborted, "rpc server stopped");
    }

    /// Set up backends that have not been set up yet, in registration order.
    async fn ensure_initialized(&mut self, port: u16) -> Result<Arc<DomainTable>, ServerError> {
        let table = Arc::clone(self.table.get_or_insert_with(|| {
            Arc::new(
                self.domains
                    .iter()
                    .map(|(name, handler)| (name.clone(), Arc::clone(handler)))
                    .collect(),
            )
        }));

        if self.initialized < self.domains.len() {
            let ctx = ServerContext::new(
                self.config.host.clone(),
                port,
                Arc::new(self.config.env.clone()),
                Arc::clone(&self.events),
                &table,
            );
            while let Some((name, handler)) = self.domains.get(self.initialized) {
                handler
                    .setup(ctx.clone())
                    .await
                    .map_err(|source| ServerError::Setup {
                        domain: name.clone(),
                        source,
                    })?;
                debug!(domain = %name, "backend set up");
                self.initialized += 1;
            }
        }
        Ok(table)
    }

    /// Build a router over the current domains without binding, for
    /// in-process use. Backends are not set up.
    pub fn router(&self) -> Router {
        let table: DomainTable = self
            .domains
            .iter()
            .map(|(name, handler)| (name.clone(), Arc::clone(handler)))
            .collect();
        let dispatcher = Dispatcher::new(
            Arc::new(table),
            Arc::clone(&self.auth),
            Arc::clone(&self.events),
        );
        router_for(
            self.transport,
            AppState {
                dispatcher: Arc::new(dispatcher),
                config: Arc::new(self.config.clone()),
                sessions: Arc::clone(&self.sessions),
            },
        )
    }

    /// Transport this server speaks.
    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bound address while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.addr)
    }

    /// Whether `start()` has succeeded and `stop()` has not run since.
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Open WebSocket sessions.
    pub fn sessions(&self) -> &Arc<SessionTable> {
        &self.sessions
    }

    /// Mounted domain names, in registration order.
    pub fn domain_names(&self) -> Vec<&str> {
        self.domains.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Look up a mounted domain.
    pub fn domain(&self, name: &str) -> Option<&Arc<dyn DomainHandler>> {
        self.domains
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, handler)| handler)
    }
}

impl Drop for RpcServer {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            running.tasks.cancel();
            let _ = self.sessions.close_all();
        }
    }
}

fn router_for(transport: TransportKind, state: AppState) -> Router {
    match transport {
        TransportKind::Http => http::router(state),
        TransportKind::WebSocket => websocket::router(state),
    }
}
