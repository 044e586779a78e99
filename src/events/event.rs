//! # Lifecycle events emitted by the orchestrator and its supervisors.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Lifecycle events**: spawn, exit, backoff and restart of a service
//! - **Stop events**: stop requests, signal failures, forced kills
//! - **Shutdown events**: whole-orchestrator shutdown flow
//! - **Subscriber events**: overflow and panics inside subscriber workers
//!
//! The [`Event`] struct carries metadata such as timestamps, service name,
//! pid, exit code, restart count and backoff delay.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Use `seq` to restore the exact order when events are delivered out of order.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use procvisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::BackoffScheduled)
//!     .with_service("api")
//!     .with_attempt(3)
//!     .with_delay(Duration::from_millis(8000));
//!
//! assert_eq!(ev.kind, EventKind::BackoffScheduled);
//! assert_eq!(ev.service.as_deref(), Some("api"));
//! assert_eq!(ev.delay_ms, Some(8000));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Service lifecycle ===
    /// A spawn is about to happen (manual start or restart).
    ///
    /// Sets: `service`, `attempt` (restart count)
    ServiceStarting,

    /// The process is running.
    ///
    /// Sets: `service`, `pid`, `attempt`
    ServiceStarted,

    /// The OS refused to spawn the process.
    ///
    /// Sets: `service`, `reason`
    SpawnFailed,

    /// The process exited without a stop being requested.
    ///
    /// Sets: `service`, `pid`, `exit_code` (if any), `reason`
    ServiceExited,

    /// A restart was scheduled after an unexpected exit.
    ///
    /// Sets: `service`, `attempt` (restarts so far), `delay_ms`
    BackoffScheduled,

    /// A scheduled restart is spawning the process again.
    ///
    /// Sets: `service`, `attempt` (new restart count)
    ServiceRestarting,

    /// The restart budget is used up; the service stays `Failed`.
    ///
    /// Sets: `service`, `attempt` (restarts performed)
    RestartBudgetExhausted,

    // === Stop flow ===
    /// A stop was requested for a live service.
    ///
    /// Sets: `service`, `pid`
    StopRequested,

    /// Delivering a termination signal failed.
    ///
    /// Sets: `service`, `pid`, `reason`
    SignalFailed,

    /// The grace period elapsed and the process was killed.
    ///
    /// Sets: `service`, `pid`, `delay_ms` (grace)
    ForceKilled,

    /// The service reached `Stopped` after a stop request.
    ///
    /// Sets: `service`, `reason` (stop outcome)
    ServiceStopped,

    /// The service was dropped by a reconfiguration.
    ///
    /// Sets: `service`
    ServiceRemoved,

    // === Shutdown ===
    /// Shutdown started; no new spawns are accepted.
    ShutdownRequested,

    /// Every service stopped.
    ///
    /// Sets: `reason` (aggregated errors, if any)
    ShutdownCompleted,

    /// The shutdown context was cancelled before all stops finished.
    ///
    /// Sets: `reason` (pending services)
    ShutdownCanceled,

    // === Subscriber events ===
    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets: `service` (subscriber name), `reason`
    SubscriberOverflow,

    /// Subscriber panicked during event processing.
    ///
    /// Sets: `service` (subscriber name), `reason`
    SubscriberPanicked,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Name of the service, if applicable.
    pub service: Option<Arc<str>>,
    /// OS process id.
    pub pid: Option<u32>,
    /// Process exit code.
    pub exit_code: Option<i32>,
    /// Restart count.
    pub attempt: Option<u32>,
    /// Delay in milliseconds (compact).
    pub delay_ms: Option<u32>,
    /// Human-readable reason (errors, outcomes, overflow details).
    pub reason: Option<Arc<str>>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            service: None,
            pid: None,
            exit_code: None,
            attempt: None,
            delay_ms: None,
            reason: None,
        }
    }

    /// Attaches a service name.
    #[inline]
    pub fn with_service(mut self, service: impl Into<Arc<str>>) -> Self {
        self.service = Some(service.into());
        self
    }

    /// Attaches a pid.
    #[inline]
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    /// Attaches an exit code, if the process reported one.
    #[inline]
    pub fn with_exit_code(mut self, code: Option<i32>) -> Self {
        self.exit_code = code;
        self
    }

    /// Attaches a restart count.
    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.delay_ms = Some(ms);
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_service(subscriber)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_service(subscriber)
            .with_reason(info)
    }

    /// True for events produced by the subscriber machinery itself.
    #[inline]
    pub fn is_internal(&self) -> bool {
        matches!(
            self.kind,
            EventKind::SubscriberOverflow | EventKind::SubscriberPanicked
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seq_is_monotonic() {
        let a = Event::new(EventKind::ServiceStarting);
        let b = Event::new(EventKind::ServiceStarted);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn delay_saturates_at_u32() {
        let ev = Event::new(EventKind::BackoffScheduled).with_delay(Duration::from_secs(u64::MAX));
        assert_eq!(ev.delay_ms, Some(u32::MAX));
    }

    #[test]
    fn subscriber_events_are_internal() {
        assert!(Event::subscriber_overflow("log", "full").is_internal());
        assert!(!Event::new(EventKind::ServiceExited).is_internal());
    }
}
