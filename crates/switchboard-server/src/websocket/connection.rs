//! One WebSocket connection, from upgrade to close.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use switchboard_rpc::{Request, Response, RpcError, ServerEvent, TransportContext};
use tokio::sync::mpsc;
use tracing::{Instrument, debug, info, instrument, warn};

use super::session::{Outbound, Session};
use crate::metrics::{WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL};
use crate::server::AppState;

/// Responses queued per connection before senders wait.
const OUTBOUND_CAPACITY: usize = 1024;

/// Message returned while a session is not authenticated.
pub const SESSION_REJECTED_MESSAGE: &str = "Session not authenticated";

fn transport_for(session: &Session) -> TransportContext {
    TransportContext::websocket(session.id.clone(), session.peer, session.is_authentic())
}

/// Run a connection until the peer leaves or the session is terminated.
///
/// 1. Registers a [`Session`] and emits `connect`
/// 2. Spawns the writer task draining the outbound queue
/// 3. Handles each inbound request on its own task
/// 4. Removes the session on the way out
#[instrument(skip_all, fields(connection_id = %connection_id))]
pub async fn run_connection(
    socket: WebSocket,
    connection_id: String,
    peer: Option<SocketAddr>,
    state: AppState,
) {
    let (ws_tx, mut ws_rx) = socket.split();
    let (tx, rx) = mpsc::channel::<Outbound>(OUTBOUND_CAPACITY);
    let session = Arc::new(Session::new(connection_id, peer, tx));
    state.sessions.insert(Arc::clone(&session));

    info!(?peer, "client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
    state.dispatcher.events().emit(ServerEvent::Connect {
        transport: transport_for(&session),
    });

    let writer = tokio::spawn(
        write_outbound(ws_tx, rx, Arc::clone(&session), state.clone()).in_current_span(),
    );

    loop {
        let frame = tokio::select! {
            frame = ws_rx.next() => frame,
            () = session.closed() => break,
        };
        let message = match frame {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                debug!(error = %e, "websocket read failed");
                break;
            }
            None => break,
        };

        // Any frame at all proves the peer is there.
        session.mark_alive();

        let text = match message {
            Message::Text(text) => text.to_string(),
            Message::Binary(data) => {
                if let Ok(text) = std::str::from_utf8(&data) {
                    text.to_owned()
                } else {
                    info!(len = data.len(), "ignoring non-UTF8 binary frame");
                    continue;
                }
            }
            Message::Close(_) => {
                info!("client sent close frame");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        let _ = tokio::spawn(
            handle_text(text, Arc::clone(&session), state.clone()).in_current_span(),
        );
    }

    session.terminate();
    let _ = state.sessions.remove(&session.id);
    let _ = writer.await;

    info!("client disconnected");
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(session.age().as_secs_f64());
}

async fn write_outbound(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Outbound>,
    session: Arc<Session>,
    state: AppState,
) {
    loop {
        let outbound = tokio::select! {
            outbound = rx.recv() => outbound,
            () = session.closed() => break,
        };
        let Some(outbound) = outbound else { break };

        let frame = match outbound {
            Outbound::Text(text) => Message::Text(text.into()),
            Outbound::Ping => Message::Ping(Bytes::new()),
        };
        if let Err(e) = sink.send(frame).await {
            warn!(error = %e, "websocket write failed");
            session.terminate();
            let _ = state.sessions.reap_closed();
            state.dispatcher.events().emit(
                ServerEvent::error(format!("Error sending message to client -- {e}"))
                    .with_transport(transport_for(&session)),
            );
            break;
        }
    }
}

/// Decode, gate, dispatch and answer one inbound message.
async fn handle_text(text: String, session: Arc<Session>, state: AppState) {
    let transport = transport_for(&session);
    let request = match state.dispatcher.decode(text.as_bytes(), &transport) {
        Ok(request) => request,
        Err(rejection) => {
            deliver(&session, &state, rejection, None).await;
            return;
        }
    };

    if !request.is_ping() && !session.is_authentic() {
        let accepted = state
            .dispatcher
            .authenticator()
            .authenticate_session(&session, &request)
            .await;
        if accepted {
            session.mark_authentic();
            debug!("session authenticated");
        } else {
            state.dispatcher.observe(&request, &transport);
            let rejection = Response::failure(
                request.id.clone(),
                &RpcError::authentication_required(SESSION_REJECTED_MESSAGE),
            );
            deliver(&session, &state, rejection, Some(&request)).await;
            return;
        }
    }

    let response = state
        .dispatcher
        .respond(&request, &transport_for(&session))
        .await;
    deliver(&session, &state, response, Some(&request)).await;
}

/// Queue a response; a dead connection is reaped and reported instead.
async fn deliver(session: &Session, state: &AppState, response: Response, request: Option<&Request>) {
    let transport = transport_for(session);
    match session.send(response.to_json()).await {
        Ok(()) => state.dispatcher.delivered(response, &transport),
        Err(e) => {
            let _ = state.sessions.reap_closed();
            let mut event = ServerEvent::error(format!("Error sending message to client -- {e}"))
                .with_transport(transport);
            if let Some(request) = request {
                event = event.with_request(request.clone());
            }
            state.dispatcher.events().emit(event);
        }
    }
}
