//! The public face of the coordinator.

use crate::bus::{self, CommandBus};
use crate::command_handler::CommandHandler;
use crate::config::ProjectorConfig;
use crate::error::ProjectorError;
use crate::registry::ProjectionRegistry;
use crate::state::{ProjectionState, ProjectorSnapshot};
use projector_core::prelude::*;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Builds a [`ProjectionManager`].
pub struct ProjectionManagerBuilder {
    log: Arc<dyn EventLog>,
    registrations: Vec<ProjectionRegistration>,
    config: ProjectorConfig,
}

impl ProjectionManagerBuilder {
    /// Registers a projection.
    pub fn register(mut self, registration: ProjectionRegistration) -> Self {
        self.registrations.push(registration);
        self
    }

    /// Replaces the configuration.
    pub fn config(mut self, config: ProjectorConfig) -> Self {
        self.config = config;
        self
    }

    /// Spawns the mailbox on the current tokio runtime. Fails when two registrations share a
    /// name, or when called outside a runtime.
    pub fn build(self) -> Result<ProjectionManager, ProjectorError> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| ProjectorError::NoRuntime)?;
        let registry = ProjectionRegistry::new(self.registrations)?;
        let (bus, mailbox) = bus::channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(ProjectorSnapshot::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handler = CommandHandler::new(
            registry.clone(),
            self.log,
            bus.clone(),
            snapshot_tx,
            self.config.catch_up_page_size,
            self.config.shutdown_timeout,
        );
        handler.publish_initial();
        let handle = runtime.spawn(mailbox.run(handler, shutdown_rx));
        log::debug!(
            "Projection coordinator started with {} projections",
            registry.names().len()
        );

        Ok(ProjectionManager {
            bus,
            registry,
            snapshot: snapshot_rx,
            shutdown_tx,
            handle: Some(handle),
        })
    }
}

/// Coordinates the registered projections over one event log.
///
/// Every method only queues a command and returns; the effects become visible through
/// [`snapshot`](Self::snapshot) and [`watch`](Self::watch) once the mailbox processed it.
/// Dropping the manager stops the coordinator without waiting for it.
pub struct ProjectionManager {
    bus: CommandBus,
    registry: ProjectionRegistry,
    snapshot: watch::Receiver<ProjectorSnapshot>,
    shutdown_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl ProjectionManager {
    /// Starts building a manager over `log`.
    pub fn builder(log: Arc<dyn EventLog>) -> ProjectionManagerBuilder {
        ProjectionManagerBuilder {
            log,
            registrations: Vec::new(),
            config: ProjectorConfig::default(),
        }
    }

    /// Starts a projection: it catches up when it lags, then tails the log.
    pub fn start(&self, name: impl Into<ProjectionName>) {
        self.bus.queue(Command::Start(name.into()));
    }

    /// Starts every registered projection.
    pub fn start_all(&self) {
        self.bus.queue(Command::StartAll);
    }

    /// Stops a projection, whether it is catching up or live.
    pub fn stop(&self, name: impl Into<ProjectionName>) {
        self.bus.queue(Command::Stop(name.into()));
    }

    /// Stops every projection.
    pub fn stop_all(&self) {
        self.bus.queue(Command::StopAll);
    }

    /// The registered projection names, in name order.
    pub fn registered_projections(&self) -> Vec<ProjectionName> {
        self.registry.names()
    }

    /// The state of `name`, if it is registered.
    pub fn projection_state(&self, name: &str) -> Option<ProjectionState> {
        self.snapshot.borrow().state(name)
    }

    /// The position of the last event fanned out to live projections.
    pub fn live_position(&self) -> Option<u64> {
        self.snapshot.borrow().live_position
    }

    /// The state after the last processed command.
    pub fn snapshot(&self) -> ProjectorSnapshot {
        self.snapshot.borrow().clone()
    }

    /// A receiver notified whenever the snapshot changes.
    pub fn watch(&self) -> watch::Receiver<ProjectorSnapshot> {
        self.snapshot.clone()
    }

    /// Stops every catch-up (waiting up to the configured shutdown timeout), closes the live
    /// subscription and stops the mailbox. Commands still queued are dropped.
    pub async fn shutdown(mut self) -> Result<(), ProjectorError> {
        self.shutdown_tx.send_replace(true);
        if let Some(handle) = self.handle.take() {
            handle.await?;
        }
        Ok(())
    }
}

impl Drop for ProjectionManager {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
    }
}
