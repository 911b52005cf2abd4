//! Per-connection session state.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

/// Frames queued for a connection's writer task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    /// A serialized response.
    Text(String),
    /// A liveness probe.
    Ping,
}

/// The connection behind a session is gone.
#[derive(Debug, Error)]
#[error("connection {0} is closed")]
pub struct SessionClosed(pub String);

/// Liveness and authentication state of one WebSocket connection.
pub struct Session {
    /// Unique connection ID.
    pub id: String,
    /// Remote address, when known.
    pub peer: Option<SocketAddr>,
    tx: mpsc::Sender<Outbound>,
    /// When the connection was accepted.
    pub connected_at: Instant,
    is_alive: AtomicBool,
    is_authentic: AtomicBool,
    closed: CancellationToken,
}

impl Session {
    /// Create a live, unauthenticated session writing into `tx`.
    pub fn new(id: impl Into<String>, peer: Option<SocketAddr>, tx: mpsc::Sender<Outbound>) -> Self {
        Self {
            id: id.into(),
            peer,
            tx,
            connected_at: Instant::now(),
            is_alive: AtomicBool::new(true),
            is_authentic: AtomicBool::new(false),
            closed: CancellationToken::new(),
        }
    }

    /// Queue a response for the writer task.
    ///
    /// Waits while the outbound queue is full; fails once the writer is gone.
    pub async fn send(&self, text: String) -> Result<(), SessionClosed> {
        if self.is_closed() {
            return Err(SessionClosed(self.id.clone()));
        }
        self.tx
            .send(Outbound::Text(text))
            .await
            .map_err(|_| SessionClosed(self.id.clone()))
    }

    /// Queue a ping without waiting.
    ///
    /// Returns `false` only when the writer is gone. A full queue still
    /// counts as probed; the next sweep decides.
    pub fn probe(&self) -> bool {
        match self.tx.try_send(Outbound::Ping) {
            Ok(()) | Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Record activity from the peer.
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
    }

    /// Whether the peer has been heard from since the last sweep.
    pub fn is_alive(&self) -> bool {
        self.is_alive.load(Ordering::Relaxed)
    }

    /// Clear the alive flag, returning its previous value.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Whether the session has passed authentication.
    pub fn is_authentic(&self) -> bool {
        self.is_authentic.load(Ordering::Acquire)
    }

    /// Mark the session as authenticated. There is no way back.
    pub fn mark_authentic(&self) {
        self.is_authentic.store(true, Ordering::Release);
    }

    /// Tear the connection down. Idempotent.
    pub fn terminate(&self) {
        self.closed.cancel();
    }

    /// Whether [`terminate`](Self::terminate) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the session is terminated.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("is_alive", &self.is_alive())
            .field("is_authentic", &self.is_authentic())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
