//! Runtime core: orchestration and lifecycle.
//!
//! The only public API from this module is [`Orchestrator`] (and its builder),
//! which supervises service processes, restarts them, and shuts them down.
//!
//! Internal modules:
//! - [`registry`]: records, per-name lifecycle locks, spawn and stop algorithms;
//! - [`supervisor`]: one task per service, classifies exits and drives restarts with backoff;
//! - [`record`]: per-service record, incarnations and public snapshots;
//! - [`shutdown`]: cross-platform shutdown signal handling.

mod builder;
mod orchestrator;
mod record;
mod registry;
mod shutdown;
mod supervisor;

pub use builder::OrchestratorBuilder;
pub use orchestrator::Orchestrator;
pub use record::{ServiceInfo, ServiceState, StopOutcome};
pub use shutdown::wait_for_shutdown_signal;
