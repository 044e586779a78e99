//! Lifecycle events: types and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** used to
//! publish/subscribe to events emitted by the orchestrator, supervisors and
//! subscriber workers.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `Orchestrator` (start/stop/shutdown), `core::supervisor`
//!   (exit/backoff/restart), `SubscriberSet` workers (overflow/panic).
//! - **Consumers**: the orchestrator's subscriber listener, which fans out to
//!   `SubscriberSet`, plus any receiver obtained from `Orchestrator::events()`.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
