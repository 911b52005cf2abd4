//! The table of open sessions and the liveness sweep over it.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use super::session::Session;

/// What one sweep did.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Sessions that were alive and got a fresh probe.
    pub probed: usize,
    /// Sessions terminated and removed.
    pub reaped: Vec<String>,
}

/// Open sessions keyed by connection ID.
///
/// Connection tasks insert and remove concurrently with the heartbeat's
/// full-table sweep; each shard is locked only for synchronous work.
#[derive(Default)]
pub struct SessionTable {
    sessions: DashMap<String, Arc<Session>>,
}

impl SessionTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session.
    pub fn insert(&self, session: Arc<Session>) {
        let _ = self.sessions.insert(session.id.clone(), session);
    }

    /// Remove a session by connection ID.
    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.remove(id).map(|(_, session)| session)
    }

    /// Look up a session.
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Number of open sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is open.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// IDs of all open sessions.
    pub fn ids(&self) -> Vec<String> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    /// One heartbeat pass.
    ///
    /// Sessions heard from since the last pass have their flag cleared and
    /// get a ping. Sessions whose flag was already clear, or whose
    /// connection is gone, are terminated and removed.
    pub fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        self.sessions.retain(|id, session| {
            let keep = !session.is_closed() && session.check_alive() && session.probe();
            if keep {
                report.probed += 1;
            } else {
                session.terminate();
                report.reaped.push(id.clone());
            }
            keep
        });
        if !report.reaped.is_empty() {
            debug!(reaped = ?report.reaped, "heartbeat reaped sessions");
        }
        report
    }

    /// Remove sessions already known to be dead, without probing anyone.
    ///
    /// Used after a failed write, where a full sweep would cut short the
    /// grace period of sessions that were just probed.
    pub fn reap_closed(&self) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, session| !session.is_closed());
        before.saturating_sub(self.sessions.len())
    }

    /// Terminate and remove every session.
    pub fn close_all(&self) -> usize {
        let mut closed = 0;
        self.sessions.retain(|_, session| {
            session.terminate();
            closed += 1;
            false
        });
        closed
    }
}
