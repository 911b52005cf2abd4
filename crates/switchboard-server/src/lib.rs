//! # switchboard-server
//!
//! Dispatch core and transports for the switchboard RPC core.
//!
//! - [`Dispatcher`]: decode, `ping`, API key gate, route by domain
//! - [`RpcServer`]: one HTTP or WebSocket listener over a dispatcher
//! - WebSocket sessions with authentication state and a heartbeat sweep
//! - [`ServerConfig`] plus a settings loader with env overrides
//! - [`logging::init_subscriber`] for binaries

#![deny(unsafe_code)]

pub mod auth;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod http;
pub mod logging;
pub mod metrics;
pub mod server;
pub mod settings;
pub mod shutdown;
pub mod websocket;

pub use auth::{ApiKeyAuthenticator, Authenticator};
pub use config::ServerConfig;
pub use dispatch::Dispatcher;
pub use errors::{ServerError, SettingsError};
pub use server::{AppState, RpcServer};
