//! Real OS processes via `tokio::process`.
//!
//! Output is forwarded line by line to `tracing` with `source = "stdout"` or
//! `source = "stderr"`. Signals go through `nix` on unix.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use super::{ExitResult, ExitStatus, ProcessHandle, ProcessSpawner, StopSignal};
use crate::config::ServiceDefinition;
use crate::error::ProcessError;

/// Variables kept when `clean_env` is set.
const INHERITED_ENV: [&str; 2] = ["PATH", "HOME"];

/// Spawns real processes.
#[derive(Clone, Copy, Debug, Default)]
pub struct OsSpawner;

impl OsSpawner {
    /// Construct a new [`OsSpawner`].
    pub fn new() -> Self {
        Self
    }

    fn command(def: &ServiceDefinition) -> Command {
        let mut cmd = Command::new(&def.command);
        cmd.args(&def.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);

        if let Some(cwd) = &def.cwd {
            cmd.current_dir(cwd);
        }

        if def.clean_env {
            cmd.env_clear();
            for key in INHERITED_ENV {
                if let Some(value) = std::env::var_os(key) {
                    cmd.env(key, value);
                }
            }
            let tmp = std::env::temp_dir();
            cmd.env("TMP", &tmp).env("TEMP", &tmp);
        }
        cmd.envs(&def.env);
        cmd
    }
}

impl ProcessSpawner for OsSpawner {
    fn spawn(&self, def: &ServiceDefinition) -> Result<Arc<dyn ProcessHandle>, ProcessError> {
        let mut child = Self::command(def)
            .spawn()
            .map_err(|e| ProcessError::Spawn(format!("{}: {e}", def.command.display())))?;

        let pid = child
            .id()
            .ok_or_else(|| ProcessError::Spawn("failed to get process ID".to_string()))?;

        let service: Arc<str> = Arc::from(def.name.as_str());
        if let Some(out) = child.stdout.take() {
            tokio::spawn(forward_lines(out, Arc::clone(&service), "stdout"));
        }
        if let Some(err) = child.stderr.take() {
            tokio::spawn(forward_lines(err, Arc::clone(&service), "stderr"));
        }

        Ok(Arc::new(OsProcess {
            pid,
            child: Mutex::new(Some(child)),
        }))
    }
}

async fn forward_lines<R>(stream: R, service: Arc<str>, source: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.is_empty() => {}
            Ok(Some(line)) if source == "stderr" => {
                tracing::warn!(service = %service, source, "{line}");
            }
            Ok(Some(line)) => {
                tracing::info!(service = %service, source, "{line}");
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(service = %service, source, error = %e, "output stream closed");
                break;
            }
        }
    }
}

/// A process spawned by [`OsSpawner`].
#[derive(Debug)]
pub struct OsProcess {
    pid: u32,
    child: Mutex<Option<Child>>,
}

#[async_trait]
impl ProcessHandle for OsProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    #[cfg(unix)]
    fn signal(&self, sig: StopSignal) -> Result<(), ProcessError> {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        let raw = i32::try_from(self.pid).map_err(|_| ProcessError::Signal {
            signal: sig.name(),
            reason: format!("pid {} out of range", self.pid),
        })?;
        let nix_sig = match sig {
            StopSignal::Terminate => Signal::SIGTERM,
            StopSignal::Kill => Signal::SIGKILL,
        };
        signal::kill(Pid::from_raw(raw), nix_sig).map_err(|errno| ProcessError::Signal {
            signal: sig.name(),
            reason: errno.desc().to_string(),
        })
    }

    #[cfg(not(unix))]
    fn signal(&self, sig: StopSignal) -> Result<(), ProcessError> {
        Err(ProcessError::Signal {
            signal: sig.name(),
            reason: "signals are not supported on this platform".to_string(),
        })
    }

    async fn wait(&self) -> ExitResult {
        let child = self.child.lock().await.take();
        let Some(mut child) = child else {
            return Err(ProcessError::AlreadyWaited);
        };
        child
            .wait()
            .await
            .map(ExitStatus::from)
            .map_err(|e| ProcessError::Wait(e.to_string()))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(name: &str, script: &str) -> ServiceDefinition {
        ServiceDefinition::new(name, "sh").with_args(["-c", script])
    }

    #[cfg_attr(miri, ignore)]
    #[tokio::test]
    async fn spawn_and_wait_reports_exit_code() {
        let handle = OsSpawner::new().spawn(&sh("exit7", "exit 7")).unwrap();
        assert!(handle.pid() > 0);
        assert_eq!(handle.wait().await, Ok(ExitStatus::from_code(7)));
        assert_eq!(handle.wait().await, Err(ProcessError::AlreadyWaited));
    }

    #[cfg_attr(miri, ignore)]
    #[tokio::test]
    async fn terminate_reports_signal() {
        let handle = OsSpawner::new().spawn(&sh("sleeper", "exec sleep 30")).unwrap();
        handle.signal(StopSignal::Terminate).unwrap();
        let status = handle.wait().await.unwrap();
        assert_eq!(status.signal, Some(15));
        assert_eq!(status.code, None);
    }

    #[cfg_attr(miri, ignore)]
    #[tokio::test]
    async fn env_and_cwd_are_applied() {
        let dir = std::env::temp_dir();
        let def = sh("env", r#"test "$SVC_MODE" = worker && test "$(pwd -P)" = "$(cd "$EXPECT" && pwd -P)""#)
            .with_env("SVC_MODE", "worker")
            .with_env("EXPECT", dir.to_string_lossy())
            .with_cwd(&dir);
        let handle = OsSpawner::new().spawn(&def).unwrap();
        assert!(handle.wait().await.unwrap().success());
    }

    #[cfg_attr(miri, ignore)]
    #[tokio::test]
    async fn clean_env_drops_inherited_variables() {
        let mut def = sh("clean", r#"test -z "$CARGO_PKG_NAME" && test -n "$TMP""#);
        def.clean_env = true;
        let handle = OsSpawner::new().spawn(&def).unwrap();
        assert!(handle.wait().await.unwrap().success());
    }

    #[cfg_attr(miri, ignore)]
    #[tokio::test]
    async fn missing_binary_is_spawn_error() {
        let def = ServiceDefinition::new("ghost", "/nonexistent/binary-12345");
        let err = OsSpawner::new().spawn(&def).err().unwrap();
        assert_eq!(err.as_label(), "process_spawn");
    }
}
