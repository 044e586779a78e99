//! Restart and backoff policies.
//!
//! This module groups the knobs that control **if/when** a crashed service is
//! restarted and **how long** to wait between attempts.
//!
//! ## Contents
//! - [`RestartPolicy`] when to restart (never / on-failure / always)
//! - [`BackoffPolicy`] how restart delays evolve (first / factor / max + jitter)
//! - [`JitterPolicy`]  randomization strategy to avoid thundering herd
//!
//! ## Quick wiring
//! ```text
//! OrchestratorConfig { restart, backoff, max_restarts, grace, .. }
//!      └─► core::supervisor::supervise uses:
//!           - restart to decide restart / stay failed
//!           - max_restarts as the restart budget
//!           - backoff.next(restarts) to schedule the next spawn
//! ```
//!
//! ## Defaults
//! - `RestartPolicy::Always` (every unexpected exit is a failure).
//! - `BackoffPolicy::default()` → first=1s, factor=2.0, max=30s, jitter=Spread{10%}.

mod backoff;
mod jitter;
mod restart;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
pub use restart::RestartPolicy;
