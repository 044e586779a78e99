//! # Demo: crash_loop
//!
//! Supervises two shell services: one that keeps running and one that exits
//! with code 3 shortly after every start. Shows the restart loop with jittered
//! backoff, the restart budget, and a deadline-bounded shutdown on Ctrl-C.
//!
//! ## Flow
//! ```text
//! start_all()
//!   ├─► ticker  : Running until shutdown
//!   └─► flaky   : Running ─► exit 3 ─► BackoffScheduled ─► Restarting ─► Running ─► ...
//!                  after max_restarts ─► RestartBudgetExhausted (Failed)
//! Ctrl-C ─► shutdown_within(10s) ─► SIGTERM both ─► Stopped
//! ```
//!
//! ## Run (unix)
//! ```bash
//! RUST_LOG=info cargo run --example crash_loop
//! ```

use std::sync::Arc;
use std::time::Duration;

use procvisor::{LogWriter, Orchestrator, OrchestratorConfig, Subscribe};
use tracing_subscriber::EnvFilter;

const CONFIG: &str = r#"
grace = "3s"
restart = "on_failure"
max_restarts = 4

[backoff]
first = "200ms"
max = "2s"
factor = 2.0
jitter = { type = "spread", percent = 10 }

[[services]]
name = "ticker"
command = "sh"
args = ["-c", "while true; do echo tick; sleep 1; done"]

[[services]]
name = "flaky"
command = "sh"
args = ["-c", "echo starting; sleep 0.5; echo crashing >&2; exit 3"]
"#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = OrchestratorConfig::from_toml_str(CONFIG)?;
    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
    let orch = Orchestrator::builder(cfg).with_subscribers(subs).build()?;

    orch.start_all().await?;

    let watcher = {
        let mut events = orch.events();
        tokio::spawn(async move {
            while let Ok(ev) = events.recv().await {
                if ev.kind == procvisor::EventKind::RestartBudgetExhausted {
                    println!("[demo] {} gave up after {:?} restarts", ev.service.as_deref().unwrap_or("-"), ev.attempt);
                }
            }
        })
    };

    println!("[demo] press Ctrl-C to shut down");
    orch.run_until_signal(Duration::from_secs(10)).await?;

    for info in orch.all_services().await {
        println!(
            "[demo] {}: state={} restarts={} last_exit={:?} last_stop={:?}",
            info.name, info.state, info.restarts, info.last_exit_code, info.last_stop
        );
    }
    watcher.abort();
    Ok(())
}
