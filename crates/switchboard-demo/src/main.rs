//! # switchboard-demo
//!
//! Runs an HTTP and a WebSocket RPC server side by side, both hosting the
//! `TestDomain` backend, and logs every server event.

#![deny(unsafe_code)]

mod backends;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use switchboard_rpc::{BackendHandler, EventSink, ServerEvent, TransportKind};
use switchboard_server::settings::{apply_env_overrides, load_settings_from_path};
use switchboard_server::{RpcServer, ServerConfig, logging};

use crate::backends::{TEST_DOMAIN, TestBackend};

/// Demo RPC server.
#[derive(Parser, Debug)]
#[command(name = "switchboard-demo", about = "Demo RPC server over HTTP and WebSocket")]
struct Cli {
    /// Host to bind (overrides settings if specified).
    #[arg(long)]
    host: Option<String>,

    /// HTTP listener port.
    #[arg(long, default_value = "3002")]
    http_port: u16,

    /// WebSocket listener port.
    #[arg(long, default_value = "3001")]
    ws_port: u16,

    /// Path to a JSON settings file.
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log level used when `RUST_LOG` is unset.
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Logs each server event at info level, with full payloads.
struct ConsoleSink {
    server: TransportKind,
}

impl EventSink for ConsoleSink {
    fn emit(&self, event: ServerEvent) {
        let server = self.server;
        match event {
            ServerEvent::Connect { transport } => {
                tracing::info!(?server, peer = ?transport.peer, "client connected");
            }
            ServerEvent::Request { request, transport } => {
                let body = serde_json::to_string(&request).unwrap_or_default();
                tracing::info!(?server, peer = ?transport.peer, "client request: {body}");
            }
            ServerEvent::Response { response, .. } => {
                tracing::info!(?server, "server sent response: {}", response.to_json());
            }
            ServerEvent::Error { description, .. } => {
                tracing::warn!(?server, "server error: {description}");
            }
        }
    }
}

fn load_config(cli: &Cli) -> Result<ServerConfig> {
    let mut config = match &cli.settings {
        Some(path) => load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings: {}", path.display()))?,
        None => {
            let mut config = ServerConfig::default();
            apply_env_overrides(&mut config);
            config
        }
    };
    if let Some(host) = &cli.host {
        config.host.clone_from(host);
    }
    Ok(config)
}

fn build_server(kind: TransportKind, config: ServerConfig) -> Result<RpcServer> {
    let events: Arc<dyn EventSink> = Arc::new(ConsoleSink { server: kind });
    let mut server = RpcServer::new(kind, config, events);
    let backend = BackendHandler::new(TestBackend::default())?.convert_exceptions_to_errors(true);
    server.add_domain(TEST_DOMAIN, Arc::new(backend))?;
    Ok(server)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_subscriber(&cli.log_level);

    let config = load_config(&cli)?;

    let mut http = build_server(
        TransportKind::Http,
        ServerConfig {
            port: cli.http_port,
            ..config.clone()
        },
    )?;
    let mut ws = build_server(
        TransportKind::WebSocket,
        ServerConfig {
            port: cli.ws_port,
            ..config
        },
    )?;

    let http_addr = http.start().await.context("Failed to start HTTP server")?;
    tracing::info!("Running http RPC server at http://{http_addr}");
    let ws_addr = ws.start().await.context("Failed to start WebSocket server")?;
    tracing::info!("Running web socket RPC server at ws://{ws_addr}");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    tracing::info!("Shutting down...");
    ws.stop().await;
    http.stop().await;
    tracing::info!("Shutdown complete");
    Ok(())
}
