//! Error types used by the orchestrator, process handles and configuration.
//!
//! This module defines three error enums:
//!
//! - [`OrchestratorError`]: errors returned by lifecycle operations.
//! - [`ProcessError`]: errors raised at the OS process boundary.
//! - [`ConfigError`]: errors raised while validating or parsing configuration.
//!
//! All types provide `as_label` (stable snake_case label for logs/metrics).
//! "Already running" is intentionally absent: starting a live service is a no-op.

use thiserror::Error;

/// # Errors produced by orchestrator lifecycle operations.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// No service with this name is configured.
    #[error("service {service} not found")]
    NotFound {
        /// Requested service name.
        service: String,
    },

    /// The service is configured but disabled.
    #[error("service {service} is disabled")]
    ServiceDisabled {
        /// Requested service name.
        service: String,
    },

    /// The orchestrator is shutting down and refuses to spawn.
    #[error("orchestrator is shutting down, cannot start {service}")]
    ShuttingDown {
        /// Requested service name.
        service: String,
    },

    /// The process could not be spawned (binary missing, permission denied, ...).
    #[error("failed to start service {service}: {source}")]
    Spawn {
        /// Service name.
        service: String,
        /// Underlying process error.
        #[source]
        source: ProcessError,
    },

    /// The process could be neither signalled nor confirmed as exited.
    #[error("failed to terminate service {service}: {reason}")]
    Terminate {
        /// Service name.
        service: String,
        /// What went wrong.
        reason: String,
    },

    /// The service crashed more than its restart budget allows.
    ///
    /// Supervision gives up; the message is kept as the service's `last_error`.
    #[error("service {service}: maximum restart attempts ({restarts}) exceeded")]
    RestartBudgetExhausted {
        /// Service name.
        service: String,
        /// Restarts performed before giving up.
        restarts: u32,
    },

    /// The shutdown context was cancelled (or its deadline passed) before every service stopped.
    #[error("shutdown context canceled; still stopping: {pending:?}")]
    ShutdownCanceled {
        /// Services whose stop had not completed yet.
        pending: Vec<String>,
    },

    /// Every service was stopped, but some stops reported errors.
    #[error("errors during shutdown: {}", join_failures(.failures))]
    ShutdownFailed {
        /// `(service, error)` per failed stop.
        failures: Vec<(String, OrchestratorError)>,
    },

    /// Some enabled services failed to start; the rest were started.
    #[error("errors during start_all: {}", join_failures(.failures))]
    StartAllFailed {
        /// `(service, error)` per failed start.
        failures: Vec<(String, OrchestratorError)>,
    },

    /// The new service set was applied, but stopping some services failed.
    #[error("errors during reconfigure: {}", join_failures(.failures))]
    ReconfigureFailed {
        /// `(service, error)` per failed stop.
        failures: Vec<(String, OrchestratorError)>,
    },

    /// The new service set is invalid; nothing was changed.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

fn join_failures(failures: &[(String, OrchestratorError)]) -> String {
    failures
        .iter()
        .map(|(name, err)| format!("{name}: {err}"))
        .collect::<Vec<_>>()
        .join("; ")
}

impl OrchestratorError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use procvisor::OrchestratorError;
    ///
    /// let err = OrchestratorError::NotFound { service: "api".into() };
    /// assert_eq!(err.as_label(), "service_not_found");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            OrchestratorError::NotFound { .. } => "service_not_found",
            OrchestratorError::ServiceDisabled { .. } => "service_disabled",
            OrchestratorError::ShuttingDown { .. } => "shutting_down",
            OrchestratorError::Spawn { .. } => "spawn_failed",
            OrchestratorError::Terminate { .. } => "terminate_failed",
            OrchestratorError::RestartBudgetExhausted { .. } => "restart_budget_exhausted",
            OrchestratorError::ShutdownCanceled { .. } => "shutdown_canceled",
            OrchestratorError::ShutdownFailed { .. } => "shutdown_failed",
            OrchestratorError::StartAllFailed { .. } => "start_all_failed",
            OrchestratorError::ReconfigureFailed { .. } => "reconfigure_failed",
            OrchestratorError::Config(e) => e.as_label(),
        }
    }

    /// True for [`OrchestratorError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, OrchestratorError::NotFound { .. })
    }

    /// True for [`OrchestratorError::ShutdownCanceled`].
    pub fn is_canceled(&self) -> bool {
        matches!(self, OrchestratorError::ShutdownCanceled { .. })
    }
}

/// # Errors produced at the process boundary.
///
/// Signal errors against an already-dead process are expected and treated
/// as non-fatal by callers.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessError {
    /// The OS refused to spawn the process.
    #[error("spawn failed: {0}")]
    Spawn(String),

    /// Signal delivery failed (typically: process already gone).
    #[error("signal {signal} failed: {reason}")]
    Signal {
        /// Signal name (`SIGTERM`, `SIGKILL`).
        signal: &'static str,
        /// OS error text.
        reason: String,
    },

    /// Waiting for the process failed.
    #[error("wait failed: {0}")]
    Wait(String),

    /// `wait()` was called more than once on the same handle.
    #[error("process already waited")]
    AlreadyWaited,
}

impl ProcessError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ProcessError::Spawn(_) => "process_spawn",
            ProcessError::Signal { .. } => "process_signal",
            ProcessError::Wait(_) => "process_wait",
            ProcessError::AlreadyWaited => "process_already_waited",
        }
    }
}

/// # Errors produced while loading service definitions.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The document could not be parsed.
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// Two definitions share a name.
    #[error("duplicate service name: {0}")]
    DuplicateService(String),

    /// A definition has an empty name.
    #[error("service name must not be empty")]
    EmptyName,
}

impl ConfigError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::Parse(_) => "config_parse",
            ConfigError::DuplicateService(_) => "config_duplicate_service",
            ConfigError::EmptyName => "config_empty_name",
        }
    }
}
