//! # LogWriter: renders lifecycle events through `tracing`.
//!
//! ## Example output (fmt subscriber)
//! ```text
//! INFO procvisor::subscribers::log: service started service="api" pid=4242 restarts=0
//!  WARN procvisor::subscribers::log: service exited service="api" pid=4242 exit_code=Some(1)
//! INFO procvisor::subscribers::log: restart scheduled service="api" delay_ms=1043 restarts=0
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Debug, Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let service = e.service.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("");
        match e.kind {
            EventKind::ServiceStarting => {
                tracing::debug!(service, restarts = ?e.attempt, "service starting");
            }
            EventKind::ServiceStarted => {
                tracing::info!(service, pid = ?e.pid, restarts = ?e.attempt, "service started");
            }
            EventKind::SpawnFailed => {
                tracing::error!(service, error = reason, "spawn failed");
            }
            EventKind::ServiceExited => {
                tracing::warn!(service, pid = ?e.pid, exit_code = ?e.exit_code, reason, "service exited");
            }
            EventKind::BackoffScheduled => {
                tracing::info!(service, delay_ms = ?e.delay_ms, restarts = ?e.attempt, "restart scheduled");
            }
            EventKind::ServiceRestarting => {
                tracing::info!(service, restarts = ?e.attempt, "service restarting");
            }
            EventKind::RestartBudgetExhausted => {
                tracing::error!(service, restarts = ?e.attempt, "restart budget exhausted");
            }
            EventKind::StopRequested => {
                tracing::debug!(service, pid = ?e.pid, "stop requested");
            }
            EventKind::SignalFailed => {
                tracing::warn!(service, pid = ?e.pid, error = reason, "signal failed");
            }
            EventKind::ForceKilled => {
                tracing::warn!(service, pid = ?e.pid, grace_ms = ?e.delay_ms, "grace elapsed, killed");
            }
            EventKind::ServiceStopped => {
                tracing::info!(service, outcome = reason, "service stopped");
            }
            EventKind::ServiceRemoved => {
                tracing::info!(service, "service removed");
            }
            EventKind::ShutdownRequested => {
                tracing::info!("shutdown requested");
            }
            EventKind::ShutdownCompleted => {
                tracing::info!(errors = reason, "shutdown completed");
            }
            EventKind::ShutdownCanceled => {
                tracing::warn!(pending = reason, "shutdown canceled");
            }
            EventKind::SubscriberOverflow => {
                tracing::warn!(subscriber = service, reason, "subscriber dropped event");
            }
            EventKind::SubscriberPanicked => {
                tracing::error!(subscriber = service, info = reason, "subscriber panicked");
            }
        }
    }

    fn name(&self) -> &'static str {
        "log-writer"
    }
}
