//! # Restart policies for supervised services.
//!
//! [`RestartPolicy`] decides whether a service that exited on its own (no stop
//! was requested, no shutdown in progress) is brought back.
//!
//! - [`RestartPolicy::Never`] auto-restart disabled; the service stays `Failed`.
//! - [`RestartPolicy::OnFailure`] restart only when the exit was not a clean `0`.
//! - [`RestartPolicy::Always`] every unexpected exit is a failure and is restarted (default).
//!
//! Whatever the policy, the restart budget (`max_restarts`) still applies.

use serde::{Deserialize, Serialize};

use crate::process::ExitResult;

/// Policy controlling whether a service is restarted after an unexpected exit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartPolicy {
    /// Never restart.
    Never,
    /// Restart unless the process exited with code 0.
    OnFailure,
    /// Restart after any unexpected exit.
    #[default]
    Always,
}

impl RestartPolicy {
    /// Returns true if `exit` should trigger a restart under this policy.
    pub fn wants_restart(&self, exit: &ExitResult) -> bool {
        match self {
            RestartPolicy::Never => false,
            RestartPolicy::Always => true,
            RestartPolicy::OnFailure => !matches!(exit, Ok(status) if status.success()),
        }
    }

    /// Returns true if a clean exit should leave the service `Stopped` rather than `Failed`.
    pub fn clean_exit_is_stop(&self, exit: &ExitResult) -> bool {
        matches!(self, RestartPolicy::OnFailure) && matches!(exit, Ok(status) if status.success())
    }
}
