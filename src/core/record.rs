//! # Service process records.
//!
//! One [`ServiceProcess`] per known service. The record persists across
//! restarts (accumulating `restarts`) and is removed only when the service is
//! dropped from configuration.
//!
//! ## Rules
//! - A record is inserted only after its first successful spawn.
//! - `handle` is `Some` only while the state is `Starting`, `Running` or `Restarting`.
//! - `generation` changes on every spawn; a supervisor holding an older
//!   generation never mutates the record.
//! - `stop` is cancelled exactly once per incarnation (`CancellationToken` is idempotent).

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::humantime_serde;
use crate::error::ProcessError;
use crate::process::{ExitResult, ProcessHandle};

/// Lifecycle state of a service.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    /// Not running (never started, stopped, or cleanly exited under `OnFailure`).
    #[default]
    Stopped,
    /// Spawned, supervision not yet attached.
    Starting,
    /// Running under supervision.
    Running,
    /// Exited unexpectedly, spawn failed, or the restart budget is exhausted.
    Failed,
    /// Backoff elapsed, a new process is being spawned.
    Restarting,
}

impl ServiceState {
    /// Stable lowercase label.
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceState::Stopped => "stopped",
            ServiceState::Starting => "starting",
            ServiceState::Running => "running",
            ServiceState::Failed => "failed",
            ServiceState::Restarting => "restarting",
        }
    }

    /// True while a process is (or is about to be) alive.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            ServiceState::Starting | ServiceState::Running | ServiceState::Restarting
        )
    }
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the most recent stop ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    /// The process exited within the grace period (or was already gone).
    Graceful,
    /// The grace period elapsed and the process was killed.
    ForceKilled,
    /// The process could be neither signalled nor confirmed exited.
    Unconfirmed,
}

impl StopOutcome {
    /// Stable snake_case label.
    pub fn as_str(&self) -> &'static str {
        match self {
            StopOutcome::Graceful => "graceful",
            StopOutcome::ForceKilled => "force_killed",
            StopOutcome::Unconfirmed => "unconfirmed",
        }
    }
}

/// Point-in-time snapshot of one service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ServiceInfo {
    /// Service name.
    pub name: String,
    /// Present in the current configuration.
    pub configured: bool,
    /// Enabled in the current configuration.
    pub enabled: bool,
    /// Lifecycle state.
    pub state: ServiceState,
    /// OS process id of the live process.
    pub pid: Option<u32>,
    /// Time since the live process was spawned (zero when not running).
    #[serde(serialize_with = "humantime_serde::serialize")]
    pub uptime: Duration,
    /// Automatic restarts performed.
    pub restarts: u32,
    /// Exit code of the last unexpected exit.
    pub last_exit_code: Option<i32>,
    /// Last failure (exit, spawn error, or restart budget exhausted).
    pub last_error: Option<String>,
    /// Outcome of the most recent stop.
    pub last_stop: Option<StopOutcome>,
}

/// Everything a supervisor needs to watch one spawned process.
pub(crate) struct Incarnation {
    pub(crate) generation: u64,
    pub(crate) pid: u32,
    pub(crate) stop: CancellationToken,
    pub(crate) exit: watch::Receiver<Option<ExitResult>>,
}

/// Per-service mutable state.
pub(crate) struct ServiceProcess {
    pub(crate) state: ServiceState,
    pub(crate) handle: Option<Arc<dyn ProcessHandle>>,
    pub(crate) pid: Option<u32>,
    pub(crate) started_at: Option<Instant>,
    pub(crate) restarts: u32,
    pub(crate) last_error: Option<String>,
    pub(crate) last_exit_code: Option<i32>,
    pub(crate) last_stop: Option<StopOutcome>,
    pub(crate) stop: CancellationToken,
    pub(crate) exit: watch::Receiver<Option<ExitResult>>,
    pub(crate) generation: u64,
}

impl ServiceProcess {
    /// Creates a record for a freshly spawned process.
    pub(crate) fn new(handle: Arc<dyn ProcessHandle>, inc: &Incarnation) -> Self {
        Self {
            state: ServiceState::Starting,
            pid: Some(inc.pid),
            handle: Some(handle),
            started_at: Some(Instant::now()),
            restarts: 0,
            last_error: None,
            last_exit_code: None,
            last_stop: None,
            stop: inc.stop.clone(),
            exit: inc.exit.clone(),
            generation: inc.generation,
        }
    }

    /// Attaches a new incarnation, retiring the previous one.
    pub(crate) fn begin(&mut self, handle: Arc<dyn ProcessHandle>, inc: &Incarnation) {
        self.stop.cancel();
        self.state = ServiceState::Starting;
        self.pid = Some(inc.pid);
        self.handle = Some(handle);
        self.started_at = Some(Instant::now());
        self.last_stop = None;
        self.stop = inc.stop.clone();
        self.exit = inc.exit.clone();
        self.generation = inc.generation;
    }

    /// Releases the process handle and enters `state`.
    pub(crate) fn release(&mut self, state: ServiceState) {
        self.state = state;
        self.handle = None;
        self.pid = None;
        self.started_at = None;
    }

    /// Builds a snapshot.
    pub(crate) fn info(&self, name: &str, configured: bool, enabled: bool) -> ServiceInfo {
        ServiceInfo {
            name: name.to_string(),
            configured,
            enabled,
            state: self.state,
            pid: self.pid,
            uptime: self
                .started_at
                .map_or(Duration::ZERO, |at| at.elapsed()),
            restarts: self.restarts,
            last_exit_code: self.last_exit_code,
            last_error: self.last_error.clone(),
            last_stop: self.last_stop,
        }
    }
}

/// Spawns the single task allowed to call `wait()` on `handle` and returns
/// the channel its result is published on.
pub(crate) fn watch_exit(
    handle: Arc<dyn ProcessHandle>,
) -> watch::Receiver<Option<ExitResult>> {
    let (tx, rx) = watch::channel(None);
    tokio::spawn(async move {
        let result = handle.wait().await;
        tx.send_replace(Some(result));
    });
    rx
}

/// Resolves once the exit watcher has published a result.
pub(crate) async fn exited(exit: &mut watch::Receiver<Option<ExitResult>>) -> ExitResult {
    match exit.wait_for(Option::is_some).await {
        Ok(slot) => slot
            .clone()
            .unwrap_or_else(|| Err(ProcessError::Wait("exit watcher lost".to_string()))),
        Err(_) => Err(ProcessError::Wait("exit watcher lost".to_string())),
    }
}

/// Human-readable failure description for an unexpected exit.
pub(crate) fn describe_exit(exit: &ExitResult) -> String {
    match exit {
        Ok(status) => format!("service exited with {status}"),
        Err(e) => format!("service exit could not be observed: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ExitStatus;

    #[test]
    fn state_labels_and_liveness() {
        assert_eq!(ServiceState::Restarting.to_string(), "restarting");
        assert!(ServiceState::Starting.is_live());
        assert!(!ServiceState::Failed.is_live());
        assert_eq!(
            serde_json::to_string(&ServiceState::Running).unwrap(),
            "\"running\""
        );
    }

    #[test]
    fn info_serializes_outcome_and_uptime() {
        let info = ServiceInfo {
            name: "api".into(),
            configured: true,
            enabled: true,
            state: ServiceState::Stopped,
            pid: None,
            uptime: Duration::ZERO,
            restarts: 2,
            last_exit_code: Some(1),
            last_error: Some(describe_exit(&Ok(ExitStatus::from_code(1)))),
            last_stop: Some(StopOutcome::ForceKilled),
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["state"], "stopped");
        assert_eq!(json["last_stop"], "force_killed");
        assert_eq!(json["uptime"], "0s");
        assert_eq!(json["last_error"], "service exited with exit code 1");
    }
}
