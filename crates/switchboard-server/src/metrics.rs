//! Metric names recorded through the `metrics` facade.
//!
//! Nothing is exported unless the host application installs a recorder.

/// Requests dispatched (counter, labels: transport, domain).
pub const RPC_REQUESTS_TOTAL: &str = "rpc_requests_total";
/// Error responses produced (counter, labels: transport, code).
pub const RPC_ERRORS_TOTAL: &str = "rpc_errors_total";
/// Time spent dispatching one request (histogram, labels: transport).
pub const RPC_REQUEST_DURATION_SECONDS: &str = "rpc_request_duration_seconds";
/// Payloads that failed to decode (counter, labels: transport).
pub const RPC_MALFORMED_TOTAL: &str = "rpc_malformed_total";
/// WebSocket connections opened (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Open WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Sessions terminated by the heartbeat sweep (counter).
pub const WS_SESSIONS_REAPED_TOTAL: &str = "ws_sessions_reaped_total";
/// WebSocket connection lifetime (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
