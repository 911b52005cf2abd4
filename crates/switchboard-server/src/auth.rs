//! Pluggable authentication.
//!
//! The core never decides who a caller is. It asks an [`Authenticator`]
//! twice: per request (the API key gate of the dispatcher) and once per
//! WebSocket session, on the first message of a not yet authentic session.

use std::collections::HashSet;

use async_trait::async_trait;
use switchboard_rpc::Request;

use crate::websocket::session::Session;

/// Authentication hook.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Whether a single request may proceed.
    fn authenticate_request(&self, request: &Request) -> bool;

    /// Whether an unauthenticated session becomes authentic, given the
    /// message that arrived on it. Defaults to the per-request check.
    async fn authenticate_session(&self, _session: &Session, request: &Request) -> bool {
        self.authenticate_request(request)
    }
}

/// Accepts requests whose `apiKey` is in a fixed set.
///
/// An empty set disables the gate: every request passes.
#[derive(Clone, Debug, Default)]
pub struct ApiKeyAuthenticator {
    keys: HashSet<String>,
}

impl ApiKeyAuthenticator {
    /// Build from the accepted keys.
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether any key is configured.
    pub fn is_enabled(&self) -> bool {
        !self.keys.is_empty()
    }
}

#[async_trait]
impl Authenticator for ApiKeyAuthenticator {
    fn authenticate_request(&self, request: &Request) -> bool {
        if self.keys.is_empty() {
            return true;
        }
        request
            .api_key
            .as_deref()
            .is_some_and(|key| self.keys.contains(key))
    }
}
