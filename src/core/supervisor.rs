//! # Supervisor: exit classification and restart decisions for one service.
//!
//! One supervisor task runs per supervision lifetime of a service. It follows the
//! service across restarts by switching to each new [`Incarnation`].
//!
//! ## Loop
//! ```text
//! loop {
//!   select! { stop.cancelled() → return,  exit observed → continue }
//!   shutting down?               → return (exit is expected noise)
//!   record exit (Failed/Stopped) → None if stop/newer incarnation → return
//!   restart policy says no       → return
//!   loop {
//!     restarts >= max_restarts   → last_error = budget exhausted, RestartBudgetExhausted, return
//!     select! { stop.cancelled() → return,  sleep(backoff.next(restarts)) }
//!     respawn(name) ─┬─ Running(inc)   → supervise inc
//!                    ├─ Failed(n)      → restarts = n, try again
//!                    └─ Abandon        → return
//!   }
//! }
//! ```
//!
//! ## Rules
//! - An intentional stop always preempts both the exit wait and the backoff sleep.
//! - Once the global shutdown flag is set, no exit leads to `Restarting`.
//! - The restart counter lives on the record and is never reset here.

use std::sync::Arc;

use crate::core::record::{Incarnation, describe_exit, exited};
use crate::core::registry::{Registry, Respawn};
use crate::error::OrchestratorError;
use crate::events::{Event, EventKind};

/// Supervises `name` starting from `run` until stopped, shut down, or given up.
pub(crate) async fn supervise(registry: Arc<Registry>, name: String, mut run: Incarnation) {
    loop {
        let exit = tokio::select! {
            biased;
            _ = run.stop.cancelled() => return,
            exit = exited(&mut run.exit) => exit,
        };

        if registry.is_shutting_down() {
            tracing::debug!(service = %name, pid = run.pid, "service exited during shutdown");
            return;
        }

        let Some(mut restarts) = registry.record_exit(&name, run.generation, &exit).await else {
            return;
        };

        let code = exit.as_ref().ok().and_then(|s| s.code);
        tracing::warn!(service = %name, pid = run.pid, exit_code = ?code, "{}", describe_exit(&exit));
        registry.bus.publish(
            Event::new(EventKind::ServiceExited)
                .with_service(name.as_str())
                .with_pid(run.pid)
                .with_exit_code(code)
                .with_reason(describe_exit(&exit)),
        );

        if !registry.cfg.restart.wants_restart(&exit) {
            tracing::info!(service = %name, policy = ?registry.cfg.restart, "not restarting service");
            return;
        }

        run = loop {
            if restarts >= registry.cfg.max_restarts {
                let exhausted = OrchestratorError::RestartBudgetExhausted {
                    service: name.clone(),
                    restarts,
                };
                tracing::error!(service = %name, restarts, "service reached maximum restart attempts");
                registry.record_exhausted(&name, run.generation, &exhausted).await;
                registry.bus.publish(
                    Event::new(EventKind::RestartBudgetExhausted)
                        .with_service(name.as_str())
                        .with_attempt(restarts)
                        .with_reason(exhausted.to_string()),
                );
                return;
            }

            let delay = registry.cfg.backoff.next(restarts);
            tracing::info!(service = %name, ?delay, restarts, "restarting service after backoff");
            registry.bus.publish(
                Event::new(EventKind::BackoffScheduled)
                    .with_service(name.as_str())
                    .with_attempt(restarts)
                    .with_delay(delay),
            );

            tokio::select! {
                biased;
                _ = run.stop.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            match registry.respawn(&name, run.generation, &run.stop).await {
                Respawn::Running(next) => break next,
                Respawn::Failed(n) => restarts = n,
                Respawn::Abandon => return,
            }
        };
    }
}
