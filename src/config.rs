//! # Orchestrator configuration.
//!
//! [`OrchestratorConfig`] holds the fleet-wide settings (grace period, restart
//! policy, backoff, restart budget, bus capacity) and the resolved list of
//! [`ServiceDefinition`]s. The orchestrator never mutates a definition; it only
//! reads them and replaces the whole set on [`reconfigure`](crate::Orchestrator::reconfigure).
//!
//! Durations are written in humantime notation (`"10s"`, `"250ms"`).
//!
//! # Example
//! ```
//! use std::time::Duration;
//! use procvisor::OrchestratorConfig;
//!
//! let cfg = OrchestratorConfig::from_toml_str(r#"
//!     grace = "5s"
//!     max_restarts = 3
//!
//!     [backoff]
//!     first = "500ms"
//!
//!     [[services]]
//!     name = "api"
//!     command = "/usr/local/bin/api"
//!     args = ["--port", "8080"]
//!
//!     [[services]]
//!     name = "indexer"
//!     command = "/usr/local/bin/indexer"
//!     enabled = false
//! "#).unwrap();
//!
//! assert_eq!(cfg.grace, Duration::from_secs(5));
//! assert_eq!(cfg.services.len(), 2);
//! assert!(!cfg.services[1].enabled);
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::policies::{BackoffPolicy, RestartPolicy};

/// Fleet-wide configuration for the orchestrator.
///
/// ## Field semantics
/// - `grace`: per-service wait between SIGTERM and SIGKILL during `stop`
/// - `restart`: whether unexpected exits are restarted
/// - `backoff`: delay schedule between restarts
/// - `max_restarts`: restart budget per service record
/// - `bus_capacity`: event bus ring buffer size (min 1; clamped by Bus)
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Time a process gets to exit after SIGTERM before it is killed.
    #[serde(with = "humantime_serde")]
    pub grace: Duration,

    /// Restart policy applied to every service.
    pub restart: RestartPolicy,

    /// Backoff policy between restarts.
    pub backoff: BackoffPolicy,

    /// Maximum number of automatic restarts before a service stays `Failed`.
    pub max_restarts: u32,

    /// Capacity of the event bus broadcast channel.
    pub bus_capacity: usize,

    /// Resolved service definitions.
    pub services: Vec<ServiceDefinition>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(10),
            restart: RestartPolicy::default(),
            backoff: BackoffPolicy::default(),
            max_restarts: 10,
            bus_capacity: 1024,
            services: Vec::new(),
        }
    }
}

impl OrchestratorConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(doc: &str) -> Result<Self, ConfigError> {
        let cfg: Self = toml::from_str(doc)?;
        validate_services(&cfg.services)?;
        Ok(cfg)
    }

    /// Returns the bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Looks up a definition by name.
    pub fn service(&self, name: &str) -> Option<&ServiceDefinition> {
        self.services.iter().find(|s| s.name == name)
    }
}

/// Checks that names are non-empty and unique.
pub(crate) fn validate_services(defs: &[ServiceDefinition]) -> Result<(), ConfigError> {
    let mut seen = HashSet::with_capacity(defs.len());
    for def in defs {
        if def.name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if !seen.insert(def.name.as_str()) {
            return Err(ConfigError::DuplicateService(def.name.clone()));
        }
    }
    Ok(())
}

/// How to launch one service process.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    /// Unique service name (registry key).
    pub name: String,
    /// Disabled services are skipped by `start_all` and refused by `start`.
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    /// Program to execute.
    pub command: PathBuf,
    /// Program arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Working directory (the service's data directory).
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// Start from an empty environment (only PATH, HOME, TMP/TEMP are inherited).
    #[serde(default)]
    pub clean_env: bool,
    /// Resource hints.
    #[serde(default)]
    pub resources: ResourceHints,
}

fn enabled_default() -> bool {
    true
}

impl ServiceDefinition {
    /// Creates an enabled definition with no arguments.
    pub fn new(name: impl Into<String>, command: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
            clean_env: false,
            resources: ResourceHints::default(),
        }
    }

    /// Appends arguments.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets one environment variable.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Sets the enabled flag.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Resource hints carried with a definition.
///
/// The orchestrator reports them but does not enforce them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceHints {
    /// Memory limit in MiB.
    pub memory_limit_mib: Option<u64>,
    /// Relative CPU weight.
    pub cpu_shares: Option<u32>,
    /// Relative IO weight.
    pub io_weight: Option<u16>,
}

/// Serde adapter for `Duration` fields written as humantime strings.
pub(crate) mod humantime_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
