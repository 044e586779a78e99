//! # procvisor
//!
//! **Procvisor** is a process supervisor library for Rust.
//!
//! It launches a named set of external service processes, watches them for
//! unexpected exits, restarts them with bounded exponential backoff, and stops
//! them on request or on shutdown (SIGTERM, grace period, SIGKILL). The crate
//! is a building block for node agents and small init-like daemons.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   ┌────────────────────┐  ┌────────────────────┐  ┌────────────────────┐
//!   │ ServiceDefinition  │  │ ServiceDefinition  │  │ ServiceDefinition  │
//!   │  (name, command)   │  │  (name, command)   │  │  (name, command)   │
//!   └─────────┬──────────┘  └─────────┬──────────┘  └─────────┬──────────┘
//!             ▼                       ▼                       ▼
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │  Orchestrator (public facade)                                         │
//! │  - Registry (records, per-name lifecycle locks, shutdown flag)        │
//! │  - ProcessSpawner (OsSpawner by default)                              │
//! │  - SubscriberSet (fans out to user subscribers)                       │
//! └──────┬───────────────────────┬───────────────────────┬────────────┬──┘
//!        ▼                       ▼                       ▼            │
//!  ┌────────────┐          ┌────────────┐          ┌────────────┐     │
//!  │ supervise  │          │ supervise  │          │ supervise  │     │
//!  │ (per svc)  │          │ (per svc)  │          │ (per svc)  │     │
//!  └─────┬──────┘          └─────┬──────┘          └─────┬──────┘     │
//!        │ ServiceExited         │ BackoffScheduled      │ ...        │
//!        ▼                       ▼                       ▼            ▼
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                     Bus (broadcast channel)                           │
//! │            (capacity: OrchestratorConfig::bus_capacity)               │
//! └───────────────────────────────────┬───────────────────────────────────┘
//!                                     ▼
//!                         subscriber_listener ─► SubscriberSet
//!                                              (per-sub queues + workers)
//! ```
//!
//! ### Lifecycle
//! ```text
//!               start                exit (unexpected)
//!  Stopped ──► Starting ──► Running ─────────────────► Failed
//!     ▲                        │                         │ policy allows, budget left
//!     │        stop            │                         ▼
//!     └────────────────────────┘      Running ◄── Restarting ◄── sleep(backoff)
//!
//! stop: cancel supervisor ─► SIGTERM ─► wait(grace) ─► SIGKILL if still alive
//! shutdown: flag (no more restarts) ─► stop all concurrently ─► bounded by ctx
//! ```
//!
//! ## Features
//! | Area              | Description                                                 | Key types / traits                       |
//! |-------------------|-------------------------------------------------------------|------------------------------------------|
//! | **Orchestration** | Start, stop, restart, inspect and shut down services.      | [`Orchestrator`], [`OrchestratorBuilder`]|
//! | **Policies**      | Restart policy and backoff with jitter.                     | [`RestartPolicy`], [`BackoffPolicy`]     |
//! | **Processes**     | Spawn and signal OS processes, or plug in your own spawner. | [`ProcessSpawner`], [`ProcessHandle`]    |
//! | **Events**        | Lifecycle events on a broadcast bus and subscriber API.    | [`Event`], [`Subscribe`]                 |
//! | **Errors**        | Typed errors for orchestration, processes and config.       | [`OrchestratorError`], [`ProcessError`]  |
//! | **Configuration** | Serde/TOML configuration with humantime durations.          | [`OrchestratorConfig`]                   |
//!
//! ## Optional features
//! - `logging` (default): exports the built-in [`LogWriter`] subscriber that
//!   renders events through `tracing`.
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use procvisor::{Orchestrator, OrchestratorConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cfg = OrchestratorConfig::from_toml_str(r#"
//!         grace = "5s"
//!         restart = "on_failure"
//!
//!         [[services]]
//!         name = "worker"
//!         command = "/usr/local/bin/worker"
//!         args = ["--queue", "default"]
//!     "#)?;
//!
//!     #[cfg(feature = "logging")]
//!     let subs: Vec<Arc<dyn procvisor::Subscribe>> = vec![Arc::new(procvisor::LogWriter::new())];
//!     #[cfg(not(feature = "logging"))]
//!     let subs: Vec<Arc<dyn procvisor::Subscribe>> = Vec::new();
//!
//!     let orch = Orchestrator::builder(cfg).with_subscribers(subs).build()?;
//!     orch.start_all().await?;
//!     orch.run_until_signal(Duration::from_secs(30)).await?;
//!     Ok(())
//! }
//! ```
mod config;
mod core;
mod error;
mod events;
mod policies;
mod process;
mod subscribers;

// ---- Public re-exports ----

pub use config::{OrchestratorConfig, ResourceHints, ServiceDefinition};
pub use core::{
    Orchestrator, OrchestratorBuilder, ServiceInfo, ServiceState, StopOutcome,
    wait_for_shutdown_signal,
};
pub use error::{ConfigError, OrchestratorError, ProcessError};
pub use events::{Bus, Event, EventKind};
pub use policies::{BackoffPolicy, JitterPolicy, RestartPolicy};
pub use process::{
    ExitResult, ExitStatus, OsProcess, OsSpawner, ProcessHandle, ProcessSpawner, StopSignal,
};
pub use subscribers::{Subscribe, SubscriberSet};

// Built-in subscriber that renders events through `tracing`.
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
