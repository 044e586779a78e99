//! Scriptable in-memory process double for orchestrator tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use super::{ExitResult, ExitStatus, ProcessHandle, ProcessSpawner, StopSignal};
use crate::config::ServiceDefinition;
use crate::error::ProcessError;

/// How a fake process reacts over its lifetime.
#[derive(Clone, Debug)]
pub(crate) enum Behavior {
    /// Runs until signalled; exits 0 on SIGTERM, by signal 9 on SIGKILL.
    Graceful,
    /// Exits right after spawn with the given code.
    ExitImmediately(i32),
    /// Exits with `code` after `after`.
    CrashAfter(Duration, i32),
    /// Ignores SIGTERM; only SIGKILL ends it.
    IgnoreTerm,
    /// Accepts every signal but never exits.
    Hang,
    /// Every signal fails; once a signal was attempted, `wait` fails too.
    Broken,
    /// `spawn` itself fails.
    SpawnFails,
}

static NEXT_PID: AtomicU32 = AtomicU32::new(10_000);

/// Spawner handing out [`FakeProcess`]es according to per-name scripts.
///
/// A script is a queue of behaviors; the last entry repeats forever.
#[derive(Default)]
pub(crate) struct FakeSpawner {
    scripts: Mutex<HashMap<String, VecDeque<Behavior>>>,
    spawned: Mutex<HashMap<String, Vec<Arc<FakeProcess>>>>,
}

impl FakeSpawner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with(self, name: &str, behavior: Behavior) -> Self {
        self.script(name, vec![behavior])
    }

    pub(crate) fn script(self, name: &str, behaviors: Vec<Behavior>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(name.to_string(), behaviors.into());
        self
    }

    fn next_behavior(&self, name: &str) -> Behavior {
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(name) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or(Behavior::Graceful),
            Some(queue) => queue.front().cloned().unwrap_or(Behavior::Graceful),
            None => Behavior::Graceful,
        }
    }

    /// Number of successful spawns for `name`.
    pub(crate) fn spawn_count(&self, name: &str) -> usize {
        self.spawned
            .lock()
            .unwrap()
            .get(name)
            .map_or(0, Vec::len)
    }

    /// Number of processes for `name` that have not exited.
    pub(crate) fn live_count(&self, name: &str) -> usize {
        self.spawned
            .lock()
            .unwrap()
            .get(name)
            .map_or(0, |procs| procs.iter().filter(|p| !p.has_exited()).count())
    }

    /// Most recent process spawned for `name`.
    pub(crate) fn last(&self, name: &str) -> Option<Arc<FakeProcess>> {
        self.spawned
            .lock()
            .unwrap()
            .get(name)
            .and_then(|procs| procs.last().cloned())
    }
}

impl ProcessSpawner for FakeSpawner {
    fn spawn(&self, def: &ServiceDefinition) -> Result<Arc<dyn ProcessHandle>, ProcessError> {
        let behavior = self.next_behavior(&def.name);
        if matches!(behavior, Behavior::SpawnFails) {
            return Err(ProcessError::Spawn(format!(
                "{}: No such file or directory",
                def.command.display()
            )));
        }

        let process = Arc::new(FakeProcess::new(behavior));
        match process.behavior {
            Behavior::ExitImmediately(code) => process.exit(Ok(ExitStatus::from_code(code))),
            Behavior::CrashAfter(after, code) => {
                let p = Arc::clone(&process);
                tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    p.exit(Ok(ExitStatus::from_code(code)));
                });
            }
            _ => {}
        }

        self.spawned
            .lock()
            .unwrap()
            .entry(def.name.clone())
            .or_default()
            .push(Arc::clone(&process));
        Ok(process)
    }
}

/// In-memory process.
pub(crate) struct FakeProcess {
    pid: u32,
    behavior: Behavior,
    exit_tx: watch::Sender<Option<ExitResult>>,
    waited: AtomicBool,
    signals: Mutex<Vec<StopSignal>>,
}

impl FakeProcess {
    fn new(behavior: Behavior) -> Self {
        let (exit_tx, _) = watch::channel(None);
        Self {
            pid: NEXT_PID.fetch_add(1, Ordering::Relaxed),
            behavior,
            exit_tx,
            waited: AtomicBool::new(false),
            signals: Mutex::new(Vec::new()),
        }
    }

    /// Terminates the process with `result` unless it already exited.
    pub(crate) fn exit(&self, result: ExitResult) {
        self.exit_tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(result);
            true
        });
    }

    /// Simulates a crash with `code`.
    pub(crate) fn crash(&self, code: i32) {
        self.exit(Ok(ExitStatus::from_code(code)));
    }

    pub(crate) fn has_exited(&self) -> bool {
        self.exit_tx.borrow().is_some()
    }

    /// Signals delivered (or attempted) so far.
    pub(crate) fn signals(&self) -> Vec<StopSignal> {
        self.signals.lock().unwrap().clone()
    }

    fn gone(sig: StopSignal) -> ProcessError {
        ProcessError::Signal {
            signal: sig.name(),
            reason: "No such process".to_string(),
        }
    }
}

#[async_trait]
impl ProcessHandle for FakeProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn signal(&self, sig: StopSignal) -> Result<(), ProcessError> {
        self.signals.lock().unwrap().push(sig);

        if let Behavior::Broken = self.behavior {
            self.exit(Err(ProcessError::Wait("wait error".to_string())));
            return Err(ProcessError::Signal {
                signal: sig.name(),
                reason: "signal error".to_string(),
            });
        }
        if self.has_exited() {
            return Err(Self::gone(sig));
        }
        match (&self.behavior, sig) {
            (Behavior::Hang, _) | (Behavior::IgnoreTerm, StopSignal::Terminate) => {}
            (_, StopSignal::Terminate) => self.exit(Ok(ExitStatus::from_code(0))),
            (_, StopSignal::Kill) => self.exit(Ok(ExitStatus::from_signal(9))),
        }
        Ok(())
    }

    async fn wait(&self) -> ExitResult {
        if self.waited.swap(true, Ordering::SeqCst) {
            return Err(ProcessError::AlreadyWaited);
        }
        let mut rx = self.exit_tx.subscribe();
        let result = match rx.wait_for(Option::is_some).await {
            Ok(slot) => slot.clone(),
            Err(_) => None,
        };
        result.unwrap_or_else(|| Err(ProcessError::Wait("exit channel closed".to_string())))
    }
}
