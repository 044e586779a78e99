//! # Service registry: records, lifecycle locks and per-name operations.
//!
//! [`Registry`] is the shared state behind the [`Orchestrator`](crate::Orchestrator)
//! facade. Supervisors hold an `Arc<Registry>` to record exits and respawn.
//!
//! ## Architecture
//! ```text
//! start / stop / restart / respawn(name)
//!        │
//!        └─► lifecycle(name)  (per-name tokio Mutex, serialises spawns and stops)
//!               │
//!               ├─► records: RwLock<HashMap<String, ServiceProcess>>   (short critical sections)
//!               └─► spawner.spawn(def) ─► watch_exit(handle) ─► Incarnation
//! ```
//!
//! ## Rules
//! - Every spawn and every stop for one name runs under that name's lifecycle lock,
//!   so two incarnations of a service are never live together.
//! - The records lock is never held across a spawn, a signal or a wait.
//! - Once `shutting_down` is set it is never cleared; no spawn happens afterwards.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio_util::sync::CancellationToken;

use crate::config::{OrchestratorConfig, ServiceDefinition};
use crate::core::record::{
    Incarnation, ServiceInfo, ServiceProcess, ServiceState, StopOutcome, describe_exit, exited,
    watch_exit,
};
use crate::core::supervisor;
use crate::error::OrchestratorError;
use crate::events::{Bus, Event, EventKind};
use crate::process::{ExitResult, ProcessHandle, ProcessSpawner, StopSignal};

/// Outcome of a scheduled restart.
pub(crate) enum Respawn {
    /// The new process is running; keep supervising it.
    Running(Incarnation),
    /// Spawn failed; the record is `Failed` with this restart count.
    Failed(u32),
    /// Stop, shutdown or a newer incarnation took over.
    Abandon,
}

/// Shared orchestrator state.
pub(crate) struct Registry {
    pub(crate) cfg: OrchestratorConfig,
    definitions: RwLock<Vec<ServiceDefinition>>,
    records: RwLock<HashMap<String, ServiceProcess>>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    shutting_down: AtomicBool,
    generation: AtomicU64,
    spawner: Arc<dyn ProcessSpawner>,
    pub(crate) bus: Bus,
}

impl Registry {
    /// Creates a registry; `cfg.services` seeds the definition set.
    pub(crate) fn new(
        mut cfg: OrchestratorConfig,
        spawner: Arc<dyn ProcessSpawner>,
        bus: Bus,
    ) -> Arc<Self> {
        let definitions = std::mem::take(&mut cfg.services);
        Arc::new(Self {
            cfg,
            definitions: RwLock::new(definitions),
            records: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            shutting_down: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            spawner,
            bus,
        })
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Sets the global shutdown flag. Returns true on the first call.
    pub(crate) fn begin_shutdown(&self) -> bool {
        !self.shutting_down.swap(true, Ordering::SeqCst)
    }

    async fn lifecycle(&self, name: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(name.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    pub(crate) async fn definition(&self, name: &str) -> Option<ServiceDefinition> {
        self.definitions
            .read()
            .await
            .iter()
            .find(|d| d.name == name)
            .cloned()
    }

    pub(crate) async fn definitions(&self) -> Vec<ServiceDefinition> {
        self.definitions.read().await.clone()
    }

    /// Names of every configured or recorded service.
    pub(crate) async fn known_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .definitions
            .read()
            .await
            .iter()
            .map(|d| d.name.clone())
            .collect();
        names.extend(self.records.read().await.keys().cloned());
        names.sort();
        names.dedup();
        names
    }

    /// Looks up a definition that may be started.
    async fn startable(&self, name: &str) -> Result<ServiceDefinition, OrchestratorError> {
        let def = self
            .definition(name)
            .await
            .ok_or_else(|| OrchestratorError::NotFound {
                service: name.to_string(),
            })?;
        if !def.enabled {
            return Err(OrchestratorError::ServiceDisabled {
                service: name.to_string(),
            });
        }
        Ok(def)
    }

    fn refuse_if_shutting_down(&self, name: &str) -> Result<(), OrchestratorError> {
        if self.is_shutting_down() {
            return Err(OrchestratorError::ShuttingDown {
                service: name.to_string(),
            });
        }
        Ok(())
    }

    /// True if `name` has a record or a definition.
    async fn is_known(&self, name: &str) -> bool {
        self.records.read().await.contains_key(name) || self.definition(name).await.is_some()
    }

    async fn is_live(&self, name: &str) -> bool {
        self.records
            .read()
            .await
            .get(name)
            .is_some_and(|r| r.state.is_live())
    }

    pub(crate) async fn state(&self, name: &str) -> Result<ServiceState, OrchestratorError> {
        if let Some(rec) = self.records.read().await.get(name) {
            return Ok(rec.state);
        }
        match self.definition(name).await {
            Some(_) => Ok(ServiceState::Stopped),
            None => Err(OrchestratorError::NotFound {
                service: name.to_string(),
            }),
        }
    }

    pub(crate) async fn info(&self, name: &str) -> Result<ServiceInfo, OrchestratorError> {
        let defs = self.definitions.read().await;
        let def = defs.iter().find(|d| d.name == name);
        let records = self.records.read().await;
        match (records.get(name), def) {
            (Some(rec), def) => Ok(rec.info(name, def.is_some(), def.is_some_and(|d| d.enabled))),
            (None, Some(def)) => Ok(ServiceInfo {
                name: name.to_string(),
                configured: true,
                enabled: def.enabled,
                state: ServiceState::Stopped,
                pid: None,
                uptime: std::time::Duration::ZERO,
                restarts: 0,
                last_exit_code: None,
                last_error: None,
                last_stop: None,
            }),
            (None, None) => Err(OrchestratorError::NotFound {
                service: name.to_string(),
            }),
        }
    }

    /// Starts `name` unless it is already live.
    pub(crate) async fn start(self: &Arc<Self>, name: &str) -> Result<(), OrchestratorError> {
        self.refuse_if_shutting_down(name)?;
        self.startable(name).await?;
        if self.is_live(name).await {
            return Ok(());
        }

        let _guard = self.lifecycle(name).await;
        self.refuse_if_shutting_down(name)?;
        let def = self.startable(name).await?;
        if self.is_live(name).await {
            return Ok(());
        }
        self.launch(&def).await
    }

    /// Stops `name`; absent or stopped services are a no-op.
    pub(crate) async fn stop(&self, name: &str) -> Result<(), OrchestratorError> {
        if !self.is_known(name).await {
            return Ok(());
        }
        let _guard = self.lifecycle(name).await;
        self.stop_locked(name).await
    }

    /// Stops then starts `name` under one lifecycle lock.
    pub(crate) async fn restart(self: &Arc<Self>, name: &str) -> Result<(), OrchestratorError> {
        self.refuse_if_shutting_down(name)?;
        self.startable(name).await?;

        let _guard = self.lifecycle(name).await;
        self.refuse_if_shutting_down(name)?;
        let def = self.startable(name).await?;
        self.stop_locked(name).await?;
        self.launch(&def).await
    }

    /// Stops `name` and forgets its record. Used when it leaves the configuration.
    pub(crate) async fn remove(&self, name: &str) -> Result<(), OrchestratorError> {
        let guard = self.lifecycle(name).await;
        let result = self.stop_locked(name).await;
        if self.records.write().await.remove(name).is_some() {
            self.bus
                .publish(Event::new(EventKind::ServiceRemoved).with_service(name));
        }
        self.locks.lock().await.remove(name);
        drop(guard);
        result
    }

    /// Replaces the definition set.
    pub(crate) async fn set_definitions(&self, defs: Vec<ServiceDefinition>) {
        *self.definitions.write().await = defs;
    }

    /// Spawns and starts supervising. Caller holds the lifecycle lock.
    async fn launch(self: &Arc<Self>, def: &ServiceDefinition) -> Result<(), OrchestratorError> {
        let inc = self.spawn_locked(def).await?;
        tokio::spawn(supervisor::supervise(
            Arc::clone(self),
            def.name.clone(),
            inc,
        ));
        Ok(())
    }

    /// Spawns a process and attaches it to the record. Caller holds the lifecycle lock.
    async fn spawn_locked(&self, def: &ServiceDefinition) -> Result<Incarnation, OrchestratorError> {
        let name = def.name.as_str();
        let restarts = self
            .records
            .read()
            .await
            .get(name)
            .map_or(0, |r| r.restarts);
        self.bus.publish(
            Event::new(EventKind::ServiceStarting)
                .with_service(name)
                .with_attempt(restarts),
        );

        let handle: Arc<dyn ProcessHandle> = match self.spawner.spawn(def) {
            Ok(handle) => handle,
            Err(source) => {
                tracing::error!(service = name, error = %source, "failed to spawn service");
                self.bus.publish(
                    Event::new(EventKind::SpawnFailed)
                        .with_service(name)
                        .with_reason(source.to_string()),
                );
                if let Some(rec) = self.records.write().await.get_mut(name) {
                    rec.release(ServiceState::Failed);
                    rec.last_error = Some(source.to_string());
                }
                return Err(OrchestratorError::Spawn {
                    service: name.to_string(),
                    source,
                });
            }
        };

        let inc = Incarnation {
            generation: self.generation.fetch_add(1, Ordering::SeqCst) + 1,
            pid: handle.pid(),
            stop: CancellationToken::new(),
            exit: watch_exit(Arc::clone(&handle)),
        };

        {
            let mut records = self.records.write().await;
            match records.get_mut(name) {
                Some(rec) => rec.begin(handle, &inc),
                None => {
                    records.insert(name.to_string(), ServiceProcess::new(handle, &inc));
                }
            }
        }
        {
            let mut records = self.records.write().await;
            if let Some(rec) = records.get_mut(name) {
                if rec.generation == inc.generation && rec.state == ServiceState::Starting {
                    rec.state = ServiceState::Running;
                }
            }
        }

        tracing::debug!(service = name, pid = inc.pid, restarts, "service spawned");
        self.bus.publish(
            Event::new(EventKind::ServiceStarted)
                .with_service(name)
                .with_pid(inc.pid)
                .with_attempt(restarts),
        );
        Ok(inc)
    }

    /// Stop algorithm. Caller holds the lifecycle lock.
    ///
    /// ```text
    /// cancel stop token ─► SIGTERM ─► wait(grace) ─┬─ exited       → Graceful
    ///                                              └─ grace elapsed → SIGKILL → ForceKilled
    /// ```
    async fn stop_locked(&self, name: &str) -> Result<(), OrchestratorError> {
        let (handle, exit) = {
            let records = self.records.read().await;
            let Some(rec) = records.get(name) else {
                return Ok(());
            };
            if rec.state == ServiceState::Stopped {
                return Ok(());
            }
            rec.stop.cancel();
            (rec.handle.clone(), rec.exit.clone())
        };

        let (outcome, result) = match handle {
            Some(handle) => self.terminate(name, handle, exit).await,
            None => (StopOutcome::Graceful, Ok(())),
        };

        if let Some(rec) = self.records.write().await.get_mut(name) {
            rec.release(ServiceState::Stopped);
            rec.last_stop = Some(outcome);
        }
        self.bus.publish(
            Event::new(EventKind::ServiceStopped)
                .with_service(name)
                .with_reason(outcome.as_str()),
        );
        result
    }

    async fn terminate(
        &self,
        name: &str,
        handle: Arc<dyn ProcessHandle>,
        mut exit: tokio::sync::watch::Receiver<Option<ExitResult>>,
    ) -> (StopOutcome, Result<(), OrchestratorError>) {
        let pid = handle.pid();
        self.bus.publish(
            Event::new(EventKind::StopRequested)
                .with_service(name)
                .with_pid(pid),
        );
        if exit.borrow().is_some() {
            return (StopOutcome::Graceful, Ok(()));
        }

        let term_error = match handle.signal(StopSignal::Terminate) {
            Ok(()) => None,
            Err(e) => {
                tracing::warn!(service = name, pid, error = %e, "failed to send SIGTERM");
                self.bus.publish(
                    Event::new(EventKind::SignalFailed)
                        .with_service(name)
                        .with_pid(pid)
                        .with_reason(e.to_string()),
                );
                Some(e)
            }
        };

        let grace = self.cfg.grace;
        match tokio::time::timeout(grace, exited(&mut exit)).await {
            Ok(Ok(_)) => (StopOutcome::Graceful, Ok(())),
            Ok(Err(wait_error)) => match term_error {
                None => (StopOutcome::Graceful, Ok(())),
                Some(term_error) => (
                    StopOutcome::Unconfirmed,
                    Err(OrchestratorError::Terminate {
                        service: name.to_string(),
                        reason: format!("{term_error}; {wait_error}"),
                    }),
                ),
            },
            Err(_elapsed) if exit.borrow().is_some() => (StopOutcome::Graceful, Ok(())),
            Err(_elapsed) => match handle.signal(StopSignal::Kill) {
                Ok(()) => {
                    tracing::warn!(service = name, pid, ?grace, "grace period elapsed, killed");
                    self.bus.publish(
                        Event::new(EventKind::ForceKilled)
                            .with_service(name)
                            .with_pid(pid)
                            .with_delay(grace),
                    );
                    (StopOutcome::ForceKilled, Ok(()))
                }
                Err(_) if exit.borrow().is_some() => (StopOutcome::Graceful, Ok(())),
                Err(kill_error) => {
                    tracing::error!(service = name, pid, error = %kill_error, "failed to kill service");
                    (
                        StopOutcome::Unconfirmed,
                        Err(OrchestratorError::Terminate {
                            service: name.to_string(),
                            reason: kill_error.to_string(),
                        }),
                    )
                }
            },
        }
    }

    /// Records an unexpected exit for `generation`.
    ///
    /// Returns the restart count, or `None` when the exit no longer concerns
    /// the record (stop requested or a newer incarnation exists).
    pub(crate) async fn record_exit(
        &self,
        name: &str,
        generation: u64,
        exit: &ExitResult,
    ) -> Option<u32> {
        let mut records = self.records.write().await;
        let rec = records.get_mut(name)?;
        if rec.generation != generation || rec.stop.is_cancelled() {
            return None;
        }
        let state = if self.cfg.restart.clean_exit_is_stop(exit) {
            ServiceState::Stopped
        } else {
            ServiceState::Failed
        };
        rec.release(state);
        rec.last_exit_code = exit.as_ref().ok().and_then(|s| s.code);
        rec.last_error = Some(describe_exit(exit));
        Some(rec.restarts)
    }

    /// Marks the record of `generation` as permanently failed.
    pub(crate) async fn record_exhausted(&self, name: &str, generation: u64, err: &OrchestratorError) {
        let mut records = self.records.write().await;
        let Some(rec) = records.get_mut(name) else {
            return;
        };
        if rec.generation != generation || rec.stop.is_cancelled() {
            return;
        }
        rec.state = ServiceState::Failed;
        rec.last_error = Some(err.to_string());
    }

    /// Scheduled restart after backoff.
    pub(crate) async fn respawn(
        &self,
        name: &str,
        generation: u64,
        stop: &CancellationToken,
    ) -> Respawn {
        let _guard = self.lifecycle(name).await;
        if stop.is_cancelled() || self.is_shutting_down() {
            return Respawn::Abandon;
        }
        let Some(def) = self.definition(name).await.filter(|d| d.enabled) else {
            return Respawn::Abandon;
        };

        let restarts = {
            let mut records = self.records.write().await;
            let Some(rec) = records.get_mut(name) else {
                return Respawn::Abandon;
            };
            if rec.generation != generation {
                return Respawn::Abandon;
            }
            rec.restarts += 1;
            rec.state = ServiceState::Restarting;
            rec.restarts
        };
        tracing::info!(service = name, restarts, "restarting service");
        self.bus.publish(
            Event::new(EventKind::ServiceRestarting)
                .with_service(name)
                .with_attempt(restarts),
        );

        match self.spawn_locked(&def).await {
            Ok(inc) => Respawn::Running(inc),
            Err(_) => Respawn::Failed(restarts),
        }
    }
}
