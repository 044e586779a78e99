//! # Process handle abstraction.
//!
//! The orchestrator never touches OS processes directly; it goes through two
//! small traits so tests can drive it with deterministic doubles.
//!
//! ```text
//! ProcessSpawner::spawn(&ServiceDefinition) ──► Arc<dyn ProcessHandle>
//!                                                   ├─ pid()
//!                                                   ├─ signal(StopSignal)
//!                                                   └─ wait().await   (exactly once)
//! ```
//!
//! ## Rules
//! - `wait()` is called by exactly one task per handle (the exit watcher);
//!   a second call yields [`ProcessError::AlreadyWaited`].
//! - `signal()` against a process that is already gone returns an error that
//!   callers treat as non-fatal.
//! - Handles carry no policy.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ServiceDefinition;
use crate::error::ProcessError;

#[cfg(test)]
pub(crate) mod fake;
mod os;

pub use os::{OsProcess, OsSpawner};

/// Result of waiting on a process.
pub type ExitResult = Result<ExitStatus, ProcessError>;

/// How a process terminated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExitStatus {
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,
    /// Terminating signal number, if the process was killed by a signal.
    pub signal: Option<i32>,
}

impl ExitStatus {
    /// Status for a process that exited with `code`.
    pub fn from_code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    /// Status for a process terminated by signal number `signal`.
    pub fn from_signal(signal: i32) -> Self {
        Self {
            code: None,
            signal: Some(signal),
        }
    }

    /// True for exit code 0.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl std::fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(sig)) => write!(f, "killed by signal {sig}"),
            (None, None) => f.write_str("unknown exit status"),
        }
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;
        Self {
            code: status.code(),
            signal,
        }
    }
}

/// Termination signal sent by `stop`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopSignal {
    /// Polite request to exit (SIGTERM).
    Terminate,
    /// Forced kill (SIGKILL).
    Kill,
}

impl StopSignal {
    /// Conventional signal name.
    pub fn name(&self) -> &'static str {
        match self {
            StopSignal::Terminate => "SIGTERM",
            StopSignal::Kill => "SIGKILL",
        }
    }
}

/// A spawned process.
#[async_trait]
pub trait ProcessHandle: Send + Sync + 'static {
    /// OS process id.
    fn pid(&self) -> u32;

    /// Delivers a termination signal.
    fn signal(&self, sig: StopSignal) -> Result<(), ProcessError>;

    /// Resolves when the process terminates. Valid once per handle.
    async fn wait(&self) -> ExitResult;
}

/// Spawns processes from service definitions.
pub trait ProcessSpawner: Send + Sync + 'static {
    /// Launches the process described by `def`.
    ///
    /// Called from within the tokio runtime.
    fn spawn(&self, def: &ServiceDefinition) -> Result<Arc<dyn ProcessHandle>, ProcessError>;
}
