//! # Orchestrator: the public lifecycle API over the service registry.
//!
//! The [`Orchestrator`] owns the event bus listener and the [`SubscriberSet`],
//! and exposes per-service operations (start/stop/restart/status/info) plus
//! fleet-wide ones (start_all/shutdown/reconfigure).
//!
//! ## Architecture
//! ```text
//! Orchestrator
//!   ├─ registry: Arc<Registry> ──► records + lifecycle locks + shutdown flag
//!   │        └─ start() ─► spawn ─► tokio::spawn(supervise(..))   (one per service)
//!   └─ listener: Bus.subscribe() ─► SubscriberSet::emit(&Event)    (fire-and-forget)
//!
//! shutdown(ctx):
//!   flag = true ─► ShutdownRequested
//!   for each known service: tokio::spawn(stop(name))   (runs to completion in background)
//!   select! {
//!     ctx.cancelled()  → ShutdownCanceled { pending }
//!     all stops joined → Ok | ShutdownFailed { failures }
//!   }
//! ```
//!
//! ## Example
//! ```no_run
//! use std::time::Duration;
//! use procvisor::{Orchestrator, OrchestratorConfig, ServiceDefinition, ServiceState};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut cfg = OrchestratorConfig::default();
//!     cfg.grace = Duration::from_secs(5);
//!     cfg.services.push(ServiceDefinition::new("ticker", "sh").with_args(["-c", "while true; do sleep 1; done"]));
//!
//!     let orch = Orchestrator::new(cfg)?;
//!     orch.start("ticker").await?;
//!     assert_eq!(orch.status("ticker").await?, ServiceState::Running);
//!
//!     orch.shutdown_within(Duration::from_secs(10)).await?;
//!     Ok(())
//! }
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{OrchestratorConfig, ServiceDefinition, validate_services};
use crate::core::builder::OrchestratorBuilder;
use crate::core::record::{ServiceInfo, ServiceState};
use crate::core::registry::Registry;
use crate::core::shutdown;
use crate::error::{ConfigError, OrchestratorError};
use crate::events::{Bus, Event, EventKind};
use crate::subscribers::SubscriberSet;

/// Supervises a named set of service processes.
pub struct Orchestrator {
    registry: Arc<Registry>,
    subs: Arc<SubscriberSet>,
    listener: Option<JoinHandle<()>>,
}

impl Orchestrator {
    /// Builds an orchestrator with the OS spawner and no subscribers.
    ///
    /// Use [`OrchestratorBuilder`] for subscribers or a custom spawner.
    pub fn new(cfg: OrchestratorConfig) -> Result<Self, ConfigError> {
        OrchestratorBuilder::new(cfg).build()
    }

    /// Returns a builder.
    pub fn builder(cfg: OrchestratorConfig) -> OrchestratorBuilder {
        OrchestratorBuilder::new(cfg)
    }

    pub(crate) fn new_internal(registry: Arc<Registry>, subs: Arc<SubscriberSet>) -> Self {
        let listener = if subs.is_empty() {
            None
        } else {
            Some(subscriber_listener(&registry.bus, Arc::clone(&subs)))
        };
        Self {
            registry,
            subs,
            listener,
        }
    }

    /// Starts a service. Starting a live service is a no-op.
    ///
    /// # Errors
    /// `NotFound`, `ServiceDisabled`, `ShuttingDown`, or `Spawn`.
    pub async fn start(&self, name: &str) -> Result<(), OrchestratorError> {
        self.registry.start(name).await
    }

    /// Stops a service: SIGTERM, then SIGKILL after the grace period.
    ///
    /// Idempotent; unknown or stopped services return `Ok`. Needing SIGKILL is
    /// not an error (see [`ServiceInfo::last_stop`]).
    ///
    /// # Errors
    /// `Terminate` when the process can be neither signalled nor confirmed exited.
    pub async fn stop(&self, name: &str) -> Result<(), OrchestratorError> {
        self.registry.stop(name).await
    }

    /// Stops and starts a service. Concurrent calls converge to one running process.
    pub async fn restart(&self, name: &str) -> Result<(), OrchestratorError> {
        self.registry.restart(name).await
    }

    /// Current state of a configured service.
    pub async fn status(&self, name: &str) -> Result<ServiceState, OrchestratorError> {
        self.registry.state(name).await
    }

    /// True if the service is `Running`.
    pub async fn is_running(&self, name: &str) -> bool {
        matches!(self.registry.state(name).await, Ok(ServiceState::Running))
    }

    /// Consistent snapshot of one service.
    pub async fn service_info(&self, name: &str) -> Result<ServiceInfo, OrchestratorError> {
        self.registry.info(name).await
    }

    /// Snapshots of every configured service, in configuration order.
    pub async fn all_services(&self) -> Vec<ServiceInfo> {
        let mut out = Vec::new();
        for def in self.registry.definitions().await {
            if let Ok(info) = self.registry.info(&def.name).await {
                out.push(info);
            }
        }
        out
    }

    /// Starts every enabled service; one failure does not abort the rest.
    ///
    /// # Errors
    /// `StartAllFailed` listing every service that failed to start.
    pub async fn start_all(&self) -> Result<(), OrchestratorError> {
        let enabled: Vec<String> = self
            .registry
            .definitions()
            .await
            .into_iter()
            .filter(|d| d.enabled)
            .map(|d| d.name)
            .collect();

        let results = futures::future::join_all(
            enabled
                .iter()
                .map(|name| async move { (name.clone(), self.start(name).await) }),
        )
        .await;

        let failures: Vec<(String, OrchestratorError)> = results
            .into_iter()
            .filter_map(|(name, res)| res.err().map(|e| (name, e)))
            .collect();
        for (name, err) in &failures {
            tracing::error!(service = %name, error = %err, "failed to start service");
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(OrchestratorError::StartAllFailed { failures })
        }
    }

    /// Replaces the service definitions.
    ///
    /// Services missing from `defs` are stopped and their records removed,
    /// which is the only way a restart counter is reset. Changed definitions
    /// apply from the next spawn; nothing new is started.
    ///
    /// # Errors
    /// `Config` if `defs` is invalid (nothing changes), `ReconfigureFailed` if
    /// some removed services failed to stop.
    pub async fn reconfigure(&self, defs: Vec<ServiceDefinition>) -> Result<(), OrchestratorError> {
        validate_services(&defs)?;

        let removed: Vec<String> = self
            .registry
            .known_names()
            .await
            .into_iter()
            .filter(|name| !defs.iter().any(|d| &d.name == name))
            .collect();
        tracing::info!(services = defs.len(), removed = removed.len(), "configuration updated");
        self.registry.set_definitions(defs).await;

        let mut failures = Vec::new();
        for name in removed {
            tracing::info!(service = %name, "service removed from configuration");
            if let Err(e) = self.registry.remove(&name).await {
                failures.push((name, e));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(OrchestratorError::ReconfigureFailed { failures })
        }
    }

    /// True once shutdown has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.registry.is_shutting_down()
    }

    /// Subscribes to lifecycle events published after this call.
    pub fn events(&self) -> broadcast::Receiver<Event> {
        self.registry.bus.subscribe()
    }

    /// Stops every service concurrently, bounded by `ctx`.
    ///
    /// Sets the global shutdown flag first, so exits from here on are never
    /// restarted. If `ctx` is cancelled before all stops finish, returns
    /// `ShutdownCanceled` at once; the remaining stops keep running in the background.
    ///
    /// # Errors
    /// `ShutdownCanceled` or `ShutdownFailed` (every per-service failure).
    pub async fn shutdown(&self, ctx: CancellationToken) -> Result<(), OrchestratorError> {
        if self.registry.begin_shutdown() {
            tracing::info!("shutting down all services");
        }
        self.registry
            .bus
            .publish(Event::new(EventKind::ShutdownRequested));

        let names = self.registry.known_names().await;
        let mut pending: BTreeSet<String> = names.iter().cloned().collect();
        let mut stops: FuturesUnordered<_> = names
            .into_iter()
            .map(|name| {
                let registry = Arc::clone(&self.registry);
                let target = name.clone();
                let task = tokio::spawn(async move { registry.stop(&target).await });
                async move { (name, task.await) }
            })
            .collect();

        let mut failures = Vec::new();
        loop {
            tokio::select! {
                biased;
                _ = ctx.cancelled() => {
                    let pending: Vec<String> = pending.into_iter().collect();
                    tracing::warn!(?pending, "shutdown canceled before all services stopped");
                    self.registry.bus.publish(
                        Event::new(EventKind::ShutdownCanceled).with_reason(pending.join(", ")),
                    );
                    return Err(OrchestratorError::ShutdownCanceled { pending });
                }
                next = stops.next() => {
                    let Some((name, joined)) = next else { break };
                    pending.remove(&name);
                    match joined {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => failures.push((name, e)),
                        Err(join_error) => failures.push((
                            name.clone(),
                            OrchestratorError::Terminate {
                                service: name,
                                reason: format!("stop task failed: {join_error}"),
                            },
                        )),
                    }
                }
            }
        }

        if failures.is_empty() {
            tracing::info!("all services stopped");
            self.registry
                .bus
                .publish(Event::new(EventKind::ShutdownCompleted));
            Ok(())
        } else {
            let err = OrchestratorError::ShutdownFailed { failures };
            tracing::error!(error = %err, "shutdown completed with errors");
            self.registry
                .bus
                .publish(Event::new(EventKind::ShutdownCompleted).with_reason(err.to_string()));
            Err(err)
        }
    }

    /// [`shutdown`](Self::shutdown) with a deadline instead of a caller token.
    pub async fn shutdown_within(&self, deadline: Duration) -> Result<(), OrchestratorError> {
        let ctx = CancellationToken::new();
        let timer = {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                ctx.cancel();
            })
        };
        let result = self.shutdown(ctx).await;
        timer.abort();
        result
    }

    /// Waits for SIGINT/SIGTERM/SIGQUIT (Ctrl-C elsewhere), then shuts down within `deadline`.
    pub async fn run_until_signal(&self, deadline: Duration) -> Result<(), OrchestratorError> {
        if let Err(e) = shutdown::wait_for_shutdown_signal().await {
            tracing::error!(error = %e, "cannot listen for shutdown signals, shutting down now");
        }
        self.shutdown_within(deadline).await
    }

    /// Number of attached subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subs.len()
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}

/// Forwards bus events to the subscriber set (fire-and-forget).
fn subscriber_listener(bus: &Bus, subs: Arc<SubscriberSet>) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(ev) => subs.emit(&ev),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "subscriber listener lagged behind the event bus");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::record::StopOutcome;
    use crate::policies::{BackoffPolicy, JitterPolicy, RestartPolicy};
    use crate::process::fake::{Behavior, FakeSpawner};
    use crate::process::{ProcessHandle, StopSignal};
    use std::future::Future;
    use tokio::time::Instant;

    fn fast_cfg(names: &[&str]) -> OrchestratorConfig {
        OrchestratorConfig {
            grace: Duration::from_millis(200),
            backoff: BackoffPolicy {
                first: Duration::from_millis(5),
                max: Duration::from_millis(20),
                factor: 2.0,
                jitter: JitterPolicy::None,
            },
            services: names
                .iter()
                .map(|n| ServiceDefinition::new(*n, format!("/opt/{n}/bin/{n}")))
                .collect(),
            ..OrchestratorConfig::default()
        }
    }

    fn build(cfg: OrchestratorConfig, spawner: &Arc<FakeSpawner>) -> Orchestrator {
        OrchestratorBuilder::new(cfg)
            .with_spawner(spawner.clone())
            .build()
            .unwrap()
    }

    async fn wait_until<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        for _ in 0..400 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    async fn wait_for_event(rx: &mut broadcast::Receiver<Event>, kind: EventKind) -> Event {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                match rx.recv().await {
                    Ok(ev) if ev.kind == kind => return ev,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => panic!("bus closed"),
                }
            }
        })
        .await
        .expect("event not observed in time")
    }

    fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<EventKind> {
        let mut kinds = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            kinds.push(ev.kind);
        }
        kinds
    }

    #[tokio::test]
    async fn start_rejects_unknown_and_disabled() {
        let spawner = Arc::new(FakeSpawner::new());
        let mut cfg = fast_cfg(&["api"]);
        cfg.services
            .push(ServiceDefinition::new("batch", "/opt/batch").with_enabled(false));
        let orch = build(cfg, &spawner);

        assert!(orch.start("ghost").await.unwrap_err().is_not_found());
        assert!(matches!(
            orch.start("batch").await,
            Err(OrchestratorError::ServiceDisabled { .. })
        ));
        assert!(!orch.is_running("ghost").await);
        assert_eq!(orch.status("batch").await.unwrap(), ServiceState::Stopped);
        assert_eq!(spawner.spawn_count("batch"), 0);
    }

    #[tokio::test]
    async fn start_then_stop_twice() {
        let spawner = Arc::new(FakeSpawner::new());
        let orch = build(fast_cfg(&["api"]), &spawner);

        orch.start("api").await.unwrap();
        assert!(orch.is_running("api").await);
        let info = orch.service_info("api").await.unwrap();
        assert!(info.pid.is_some());
        assert!(info.configured && info.enabled);

        orch.stop("api").await.unwrap();
        orch.stop("api").await.unwrap();
        let info = orch.service_info("api").await.unwrap();
        assert_eq!(info.state, ServiceState::Stopped);
        assert_eq!(info.pid, None);
        assert_eq!(info.last_stop, Some(StopOutcome::Graceful));
        assert_eq!(spawner.live_count("api"), 0);
        assert_eq!(
            spawner.last("api").unwrap().signals(),
            vec![StopSignal::Terminate]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_starts_spawn_once() {
        let spawner = Arc::new(FakeSpawner::new());
        let orch = Arc::new(build(fast_cfg(&["api"]), &spawner));

        let calls: Vec<_> = (0..10)
            .map(|_| {
                let orch = Arc::clone(&orch);
                tokio::spawn(async move { orch.start("api").await })
            })
            .collect();
        for call in calls {
            call.await.unwrap().unwrap();
        }

        assert_eq!(spawner.spawn_count("api"), 1);
        assert_eq!(spawner.live_count("api"), 1);
        assert_eq!(orch.status("api").await.unwrap(), ServiceState::Running);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_restarts_converge_to_one_process() {
        let spawner = Arc::new(FakeSpawner::new());
        let orch = Arc::new(build(fast_cfg(&["api"]), &spawner));
        orch.start("api").await.unwrap();

        let calls: Vec<_> = (0..5)
            .map(|_| {
                let orch = Arc::clone(&orch);
                tokio::spawn(async move { orch.restart("api").await })
            })
            .collect();
        for call in calls {
            call.await.unwrap().unwrap();
        }

        assert_eq!(orch.status("api").await.unwrap(), ServiceState::Running);
        assert_eq!(spawner.spawn_count("api"), 6);
        assert_eq!(spawner.live_count("api"), 1);
        let info = orch.service_info("api").await.unwrap();
        assert_eq!(info.pid, Some(spawner.last("api").unwrap().pid()));
    }

    #[tokio::test]
    async fn crash_is_restarted_with_backoff() {
        let spawner = Arc::new(FakeSpawner::new().script(
            "api",
            vec![Behavior::CrashAfter(Duration::from_millis(10), 2), Behavior::Graceful],
        ));
        let orch = build(fast_cfg(&["api"]), &spawner);
        let mut rx = orch.events();

        orch.start("api").await.unwrap();
        let exited = wait_for_event(&mut rx, EventKind::ServiceExited).await;
        assert_eq!(exited.exit_code, Some(2));
        let backoff = wait_for_event(&mut rx, EventKind::BackoffScheduled).await;
        assert_eq!(backoff.delay_ms, Some(5));
        assert_eq!(backoff.attempt, Some(0));
        wait_for_event(&mut rx, EventKind::ServiceRestarting).await;
        wait_for_event(&mut rx, EventKind::ServiceStarted).await;

        let o = &orch;
        wait_until(|| async move { o.is_running("api").await }).await;
        let info = orch.service_info("api").await.unwrap();
        assert_eq!(info.restarts, 1);
        assert_eq!(info.last_exit_code, Some(2));
        assert_eq!(spawner.spawn_count("api"), 2);
    }

    #[tokio::test]
    async fn restart_budget_is_exact() {
        let spawner = Arc::new(FakeSpawner::new().with("api", Behavior::ExitImmediately(1)));
        let mut cfg = fast_cfg(&["api"]);
        cfg.max_restarts = 3;
        let orch = build(cfg, &spawner);
        let mut rx = orch.events();

        orch.start("api").await.unwrap();
        let exhausted = wait_for_event(&mut rx, EventKind::RestartBudgetExhausted).await;
        assert_eq!(exhausted.attempt, Some(3));

        tokio::time::sleep(Duration::from_millis(60)).await;
        let info = orch.service_info("api").await.unwrap();
        assert_eq!(info.state, ServiceState::Failed);
        assert_eq!(info.restarts, 3);
        assert_eq!(info.last_exit_code, Some(1));
        assert_eq!(
            info.last_error.as_deref(),
            Some("service api: maximum restart attempts (3) exceeded")
        );
        assert_eq!(exhausted.reason, info.last_error.as_deref().map(Into::into));
        assert_eq!(spawner.spawn_count("api"), 4);
    }

    #[tokio::test]
    async fn pending_restart_differs_from_exhausted_budget() {
        let spawner = Arc::new(FakeSpawner::new().with("api", Behavior::ExitImmediately(1)));
        let mut cfg = fast_cfg(&["api"]);
        cfg.max_restarts = 1;
        cfg.backoff.first = Duration::from_millis(300);
        cfg.backoff.max = Duration::from_millis(300);
        let orch = build(cfg, &spawner);
        let mut rx = orch.events();

        orch.start("api").await.unwrap();
        wait_for_event(&mut rx, EventKind::BackoffScheduled).await;
        let pending = orch.service_info("api").await.unwrap();
        assert_eq!(pending.state, ServiceState::Failed);
        assert_eq!(pending.restarts, 0);
        assert_eq!(pending.last_error.as_deref(), Some("service exited with exit code 1"));

        wait_for_event(&mut rx, EventKind::RestartBudgetExhausted).await;
        let exhausted = orch.service_info("api").await.unwrap();
        assert_eq!(exhausted.state, ServiceState::Failed);
        assert_eq!(exhausted.restarts, 1);
        assert_eq!(
            exhausted.last_error.as_deref(),
            Some("service api: maximum restart attempts (1) exceeded")
        );
    }

    #[tokio::test]
    async fn failed_respawn_counts_against_budget() {
        let spawner = Arc::new(FakeSpawner::new().script(
            "api",
            vec![
                Behavior::CrashAfter(Duration::from_millis(5), 1),
                Behavior::SpawnFails,
                Behavior::Graceful,
            ],
        ));
        let orch = build(fast_cfg(&["api"]), &spawner);

        orch.start("api").await.unwrap();
        let o = &orch;
        wait_until(|| async move {
            o.service_info("api")
                .await
                .is_ok_and(|i| i.state == ServiceState::Running && i.restarts == 2)
        })
        .await;
        assert_eq!(spawner.spawn_count("api"), 2);
    }

    #[tokio::test]
    async fn never_policy_leaves_failed() {
        let spawner = Arc::new(FakeSpawner::new().with("api", Behavior::ExitImmediately(3)));
        let mut cfg = fast_cfg(&["api"]);
        cfg.restart = RestartPolicy::Never;
        let orch = build(cfg, &spawner);
        let mut rx = orch.events();

        orch.start("api").await.unwrap();
        wait_for_event(&mut rx, EventKind::ServiceExited).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        let info = orch.service_info("api").await.unwrap();
        assert_eq!(info.state, ServiceState::Failed);
        assert_eq!(info.last_exit_code, Some(3));
        assert_eq!(info.last_error.as_deref(), Some("service exited with exit code 3"));
        assert_eq!(spawner.spawn_count("api"), 1);
    }

    #[tokio::test]
    async fn on_failure_clean_exit_is_stopped() {
        let spawner = Arc::new(FakeSpawner::new().with("job", Behavior::ExitImmediately(0)));
        let mut cfg = fast_cfg(&["job"]);
        cfg.restart = RestartPolicy::OnFailure;
        let orch = build(cfg, &spawner);
        let mut rx = orch.events();

        orch.start("job").await.unwrap();
        wait_for_event(&mut rx, EventKind::ServiceExited).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(orch.status("job").await.unwrap(), ServiceState::Stopped);
        assert_eq!(spawner.spawn_count("job"), 1);
    }

    #[tokio::test]
    async fn stop_during_backoff_cancels_restart() {
        let spawner = Arc::new(FakeSpawner::new().with("api", Behavior::ExitImmediately(1)));
        let mut cfg = fast_cfg(&["api"]);
        cfg.backoff.first = Duration::from_secs(30);
        cfg.backoff.max = Duration::from_secs(30);
        let orch = build(cfg, &spawner);
        let mut rx = orch.events();

        orch.start("api").await.unwrap();
        wait_for_event(&mut rx, EventKind::BackoffScheduled).await;

        let started = Instant::now();
        orch.stop("api").await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(orch.status("api").await.unwrap(), ServiceState::Stopped);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!drain(&mut rx).contains(&EventKind::ServiceRestarting));
        assert_eq!(spawner.spawn_count("api"), 1);
    }

    #[tokio::test]
    async fn grace_elapsed_is_force_killed() {
        let spawner = Arc::new(FakeSpawner::new().with("api", Behavior::IgnoreTerm));
        let mut cfg = fast_cfg(&["api"]);
        cfg.grace = Duration::from_millis(50);
        let orch = build(cfg, &spawner);
        let mut rx = orch.events();

        orch.start("api").await.unwrap();
        orch.stop("api").await.unwrap();

        let info = orch.service_info("api").await.unwrap();
        assert_eq!(info.state, ServiceState::Stopped);
        assert_eq!(info.last_stop, Some(StopOutcome::ForceKilled));
        assert_eq!(
            spawner.last("api").unwrap().signals(),
            vec![StopSignal::Terminate, StopSignal::Kill]
        );
        wait_for_event(&mut rx, EventKind::ForceKilled).await;
    }

    #[tokio::test]
    async fn spawn_failure_registers_nothing() {
        let spawner = Arc::new(FakeSpawner::new().with("api", Behavior::SpawnFails));
        let orch = build(fast_cfg(&["api"]), &spawner);

        let err = orch.start("api").await.unwrap_err();
        assert_eq!(err.as_label(), "spawn_failed");
        let info = orch.service_info("api").await.unwrap();
        assert_eq!(info.state, ServiceState::Stopped);
        assert_eq!(info.restarts, 0);
        assert!(orch.service_info("api").await.unwrap().pid.is_none());
    }

    #[tokio::test]
    async fn start_all_skips_disabled_and_collects_failures() {
        let spawner = Arc::new(FakeSpawner::new().with("b", Behavior::SpawnFails));
        let mut cfg = fast_cfg(&["a", "b"]);
        cfg.services
            .push(ServiceDefinition::new("c", "/opt/c").with_enabled(false));
        let orch = build(cfg, &spawner);

        match orch.start_all().await {
            Err(OrchestratorError::StartAllFailed { failures }) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].0, "b");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(orch.is_running("a").await);
        assert_eq!(orch.status("c").await.unwrap(), ServiceState::Stopped);
        assert_eq!(spawner.spawn_count("c"), 0);

        let all = orch.all_services().await;
        let names: Vec<&str> = all.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn reconfigure_removes_dropped_services() {
        let spawner = Arc::new(FakeSpawner::new());
        let orch = build(fast_cfg(&["a", "b"]), &spawner);
        let mut rx = orch.events();
        orch.start_all().await.unwrap();

        let keep = vec![ServiceDefinition::new("a", "/opt/a/bin/a")];
        orch.reconfigure(keep).await.unwrap();

        let removed = wait_for_event(&mut rx, EventKind::ServiceRemoved).await;
        assert_eq!(removed.service.as_deref(), Some("b"));
        assert!(orch.status("b").await.unwrap_err().is_not_found());
        assert_eq!(spawner.live_count("b"), 0);
        assert!(orch.is_running("a").await);

        let dup = vec![
            ServiceDefinition::new("a", "/x"),
            ServiceDefinition::new("a", "/y"),
        ];
        assert!(matches!(
            orch.reconfigure(dup).await,
            Err(OrchestratorError::Config(ConfigError::DuplicateService(_)))
        ));
        assert!(orch.is_running("a").await);
    }

    #[tokio::test]
    async fn shutdown_stops_everything() {
        let spawner = Arc::new(FakeSpawner::new());
        let orch = build(fast_cfg(&["a", "b"]), &spawner);
        let mut rx = orch.events();
        orch.start_all().await.unwrap();

        orch.shutdown_within(Duration::from_secs(1)).await.unwrap();

        assert!(orch.is_shutting_down());
        for name in ["a", "b"] {
            let info = orch.service_info(name).await.unwrap();
            assert_eq!(info.state, ServiceState::Stopped);
            assert_eq!(info.last_stop, Some(StopOutcome::Graceful));
        }
        assert!(matches!(
            orch.start("a").await,
            Err(OrchestratorError::ShuttingDown { .. })
        ));
        let kinds = drain(&mut rx);
        assert!(kinds.contains(&EventKind::ShutdownRequested));
        assert!(kinds.contains(&EventKind::ShutdownCompleted));
    }

    #[tokio::test]
    async fn shutdown_with_no_services_is_ok() {
        let spawner = Arc::new(FakeSpawner::new());
        let orch = build(fast_cfg(&[]), &spawner);
        orch.shutdown(CancellationToken::new()).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_returns_promptly_when_canceled() {
        let spawner = Arc::new(FakeSpawner::new().with("stuck", Behavior::Hang));
        let mut cfg = fast_cfg(&["stuck"]);
        cfg.grace = Duration::from_secs(30);
        let orch = build(cfg, &spawner);
        orch.start("stuck").await.unwrap();

        let ctx = CancellationToken::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let started = Instant::now();
        let err = orch.shutdown(ctx).await.unwrap_err();
        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(err.is_canceled());
        assert!(err.to_string().contains("context canceled"));
        match err {
            OrchestratorError::ShutdownCanceled { pending } => assert_eq!(pending, ["stuck"]),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn shutdown_aggregates_failures_and_stops_all() {
        let spawner = Arc::new(FakeSpawner::new().with("service2", Behavior::Broken));
        let orch = build(fast_cfg(&["service1", "service2"]), &spawner);
        orch.start_all().await.unwrap();

        let err = orch
            .shutdown_within(Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("errors during shutdown"));
        assert!(err.to_string().contains("service2"));
        match &err {
            OrchestratorError::ShutdownFailed { failures } => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].0, "service2");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        assert_eq!(orch.status("service1").await.unwrap(), ServiceState::Stopped);
        assert_eq!(orch.status("service2").await.unwrap(), ServiceState::Stopped);
        assert_eq!(
            orch.service_info("service2").await.unwrap().last_stop,
            Some(StopOutcome::Unconfirmed)
        );
    }

    #[tokio::test]
    async fn exits_after_shutdown_flag_are_not_restarted() {
        let spawner = Arc::new(FakeSpawner::new());
        let orch = build(fast_cfg(&["api"]), &spawner);
        let mut rx = orch.events();
        orch.start("api").await.unwrap();

        orch.registry.begin_shutdown();
        spawner.last("api").unwrap().crash(1);
        tokio::time::sleep(Duration::from_millis(50)).await;

        orch.shutdown_within(Duration::from_secs(1)).await.unwrap();
        let kinds = drain(&mut rx);
        assert!(!kinds.contains(&EventKind::ServiceRestarting));
        assert!(!kinds.contains(&EventKind::BackoffScheduled));
        assert_eq!(spawner.spawn_count("api"), 1);
        assert_eq!(orch.status("api").await.unwrap(), ServiceState::Stopped);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn os_processes_end_to_end() {
        let mut cfg = fast_cfg(&[]);
        cfg.max_restarts = 2;
        cfg.grace = Duration::from_secs(2);
        cfg.services = vec![
            ServiceDefinition::new("sleeper", "sh").with_args(["-c", "exec sleep 30"]),
            ServiceDefinition::new("crasher", "sh").with_args(["-c", "exit 3"]),
        ];
        let orch = Orchestrator::new(cfg).unwrap();
        let mut rx = orch.events();

        orch.start_all().await.unwrap();
        assert!(orch.is_running("sleeper").await);

        let exhausted = wait_for_event(&mut rx, EventKind::RestartBudgetExhausted).await;
        assert_eq!(exhausted.service.as_deref(), Some("crasher"));
        let crasher = orch.service_info("crasher").await.unwrap();
        assert_eq!(crasher.state, ServiceState::Failed);
        assert_eq!(crasher.last_exit_code, Some(3));

        orch.stop("sleeper").await.unwrap();
        let sleeper = orch.service_info("sleeper").await.unwrap();
        assert_eq!(sleeper.last_stop, Some(StopOutcome::Graceful));
        orch.shutdown_within(Duration::from_secs(5)).await.unwrap();
    }
}
