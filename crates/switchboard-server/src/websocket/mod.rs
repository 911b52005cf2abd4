//! WebSocket transport: persistent connections, sessions and heartbeat.

pub mod connection;
pub mod heartbeat;
pub mod session;
pub mod table;

use std::net::SocketAddr;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::http::Extensions;
use axum::response::Response;
use uuid::Uuid;

use crate::server::AppState;

pub use session::{Outbound, Session, SessionClosed};
pub use table::{SessionTable, SweepReport};

/// Router upgrading every path to a WebSocket connection.
pub fn router(state: AppState) -> Router {
    Router::new().fallback(ws_endpoint).with_state(state)
}

async fn ws_endpoint(
    State(state): State<AppState>,
    extensions: Extensions,
    ws: WebSocketUpgrade,
) -> Response {
    let peer = extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let connection_id = format!("conn_{}", Uuid::now_v7().simple());
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| connection::run_connection(socket, connection_id, peer, state))
}
