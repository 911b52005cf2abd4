//! Background tasks of one server run, stopped together.
//!
//! Each `start()` gets a fresh [`TaskGroup`]. Tasks receive the group's
//! cancellation token when spawned; `stop()` cancels it, waits out a grace
//! period and aborts whatever is still running.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Grace period `stop()` gives server tasks before aborting them.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Named tasks sharing one cancellation token.
#[derive(Default)]
pub struct TaskGroup {
    cancel: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl TaskGroup {
    /// An empty group.
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `task` with a clone of the group's token.
    pub fn spawn<F, Fut>(&mut self, name: &'static str, task: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task(self.cancel.clone()));
        self.tasks.push((name, handle));
    }

    /// Number of tasks spawned so far.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether nothing has been spawned.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Ask every task to stop without waiting.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether [`cancel`](Self::cancel) or [`stop`](Self::stop) has run.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancel, then wait up to `grace` for every task.
    ///
    /// Returns the names of tasks that had to be aborted.
    pub async fn stop(self, grace: Duration) -> Vec<&'static str> {
        self.cancel.cancel();
        let deadline = tokio::time::Instant::now() + grace;

        let mut aborted = Vec::new();
        for (name, mut handle) in self.tasks {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => debug!(task = name, "task stopped"),
                Ok(Err(e)) => warn!(task = name, error = %e, "task ended abnormally"),
                Err(_) => {
                    warn!(task = name, ?grace, "task ignored cancellation, aborting");
                    handle.abort();
                    aborted.push(name);
                }
            }
        }
        aborted
    }
}
