use std::sync::Arc;

use crate::{
    config::{OrchestratorConfig, validate_services},
    core::{orchestrator::Orchestrator, registry::Registry},
    error::ConfigError,
    events::Bus,
    process::{OsSpawner, ProcessSpawner},
    subscribers::{Subscribe, SubscriberSet},
};

/// Builder for constructing an [`Orchestrator`].
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use procvisor::{OrchestratorBuilder, OrchestratorConfig, ServiceDefinition};
///
/// # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
/// let mut cfg = OrchestratorConfig::default();
/// cfg.services.push(ServiceDefinition::new("api", "/usr/local/bin/api"));
///
/// let orch = OrchestratorBuilder::new(cfg)
///     .with_subscribers(vec![Arc::new(procvisor::LogWriter::new())])
///     .build()?;
/// orch.start_all().await?;
/// # Ok(())
/// # }
/// ```
pub struct OrchestratorBuilder {
    cfg: OrchestratorConfig,
    subscribers: Vec<Arc<dyn Subscribe>>,
    spawner: Arc<dyn ProcessSpawner>,
}

impl OrchestratorBuilder {
    /// Creates a new builder with the given configuration and the OS spawner.
    pub fn new(cfg: OrchestratorConfig) -> Self {
        Self {
            cfg,
            subscribers: Vec::new(),
            spawner: Arc::new(OsSpawner::new()),
        }
    }

    /// Sets event subscribers.
    ///
    /// Subscribers receive lifecycle events through dedicated workers with
    /// bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Replaces the process spawner.
    pub fn with_spawner(mut self, spawner: Arc<dyn ProcessSpawner>) -> Self {
        self.spawner = spawner;
        self
    }

    /// Validates the service set and builds the orchestrator.
    ///
    /// Must be called from within a tokio runtime (subscriber workers are spawned here).
    pub fn build(self) -> Result<Orchestrator, ConfigError> {
        validate_services(&self.cfg.services)?;

        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let subs = Arc::new(SubscriberSet::new(self.subscribers, bus.clone()));
        let registry = Registry::new(self.cfg, self.spawner, bus);
        Ok(Orchestrator::new_internal(registry, subs))
    }
}
