//! HTTP transport: one POSTed request, one JSON response.
//!
//! Every RPC outcome is answered `200 OK`; callers branch on `error` in the
//! body. Only the method is judged at the HTTP level. CORS, preflight
//! included, is handled by a [`CorsLayer`] in front of the endpoint.

use std::net::SocketAddr;

use axum::Router;
use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use switchboard_rpc::{RpcError, ServerEvent, TransportContext};
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tracing::{debug, instrument};

use crate::server::AppState;

/// Body sent with a `400` for anything but `POST`.
pub const POST_ONLY_MESSAGE: &str = "400: RPC server only allows POST requests";

/// Router answering RPC on every path.
pub fn router(state: AppState) -> Router {
    let cors = state.config.cors;
    let router = Router::new().fallback(rpc_endpoint).with_state(state);
    if cors { router.layer(cors_layer()) } else { router }
}

/// Reflects the caller's origin and requested headers, with credentials.
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_credentials(true)
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers(AllowHeaders::mirror_request())
}

/// Handle one HTTP exchange.
#[instrument(skip_all, fields(method = %request.method()))]
pub async fn rpc_endpoint(State(state): State<AppState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    if parts.method != Method::POST {
        debug!("rejecting non-POST request");
        return (StatusCode::BAD_REQUEST, POST_ONLY_MESSAGE).into_response();
    }

    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let transport = TransportContext::http(peer);

    let response = match read_body(body, state.config.max_message_size).await {
        Ok(bytes) => match state.dispatcher.decode(&bytes, &transport) {
            Ok(request) => state.dispatcher.respond(&request, &transport).await,
            Err(rejection) => rejection,
        },
        Err(description) => {
            state.dispatcher.events().emit(
                ServerEvent::error(description.clone()).with_transport(transport.clone()),
            );
            switchboard_rpc::Response::failure(None, &RpcError::invalid_request(description))
        }
    };

    let http = (
        StatusCode::OK,
        [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
        response.to_json(),
    )
        .into_response();
    // Emitted once the body is final; axum writes it after this returns.
    state.dispatcher.delivered(response, &transport);
    http
}

async fn read_body(body: Body, limit: usize) -> Result<bytes::Bytes, String> {
    axum::body::to_bytes(body, limit)
        .await
        .map_err(|e| format!("Failed to read request body: {e}"))
}
