//! Heartbeat: the periodic liveness sweep over all sessions.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::table::SessionTable;
use crate::metrics::WS_SESSIONS_REAPED_TOTAL;

/// Totals over the life of one heartbeat task.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HeartbeatStats {
    /// Sweeps performed.
    pub sweeps: u64,
    /// Sessions terminated for not answering a probe.
    pub reaped: u64,
}

/// Sweep `sessions` every `interval` until `cancel` fires.
///
/// The first sweep runs immediately. A session must answer the probe sent by
/// one sweep before the next one, or it is terminated.
pub async fn run_heartbeat(
    sessions: Arc<SessionTable>,
    interval: Duration,
    cancel: CancellationToken,
) -> HeartbeatStats {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut stats = HeartbeatStats::default();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let report = sessions.sweep();
                stats.sweeps += 1;
                if !report.reaped.is_empty() {
                    let reaped = report.reaped.len() as u64;
                    stats.reaped += reaped;
                    counter!(WS_SESSIONS_REAPED_TOTAL).increment(reaped);
                    info!(reaped = ?report.reaped, "terminated unresponsive sessions");
                }
            }
            () = cancel.cancelled() => {
                return stats;
            }
        }
    }
}
