//! Engine assembly.
//!
//! `WorkflowEngine` wires a store, the definition registry, the lifecycle bus,
//! and a clock into a controller and a host that share them.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use waypoint_types::config::EngineConfig;
use waypoint_types::event::LifecycleEvent;

use crate::clock::{Clock, SystemClock};
use crate::error::EngineError;
use crate::event::LifecycleBus;
use crate::repository::PersistenceProvider;
use crate::workflow::controller::WorkflowController;
use crate::workflow::definition::WorkflowDefinition;
use crate::workflow::executor::WorkflowExecutor;
use crate::workflow::host::{PollSummary, WorkflowHost};
use crate::workflow::lock::InstanceLocks;
use crate::workflow::registry::DefinitionRegistry;
use crate::workflow::retry::PolicyDefaults;

pub struct WorkflowEngine<P> {
    store: Arc<P>,
    registry: Arc<DefinitionRegistry>,
    bus: LifecycleBus,
    controller: WorkflowController<P>,
    host: Arc<WorkflowHost<P>>,
}

impl<P: PersistenceProvider + 'static> WorkflowEngine<P> {
    pub fn new(store: P, config: EngineConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    /// Build an engine that reads time from `clock`.
    pub fn with_clock(store: P, config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        let store = Arc::new(store);
        let registry = Arc::new(DefinitionRegistry::new());
        let locks = Arc::new(InstanceLocks::new());
        let bus = LifecycleBus::new(config.event_bus_capacity);

        let executor = Arc::new(WorkflowExecutor::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            bus.clone(),
            PolicyDefaults::from_config(&config),
        ));
        let controller = WorkflowController::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&locks),
            Arc::clone(&clock),
            bus.clone(),
        );
        let host = Arc::new(WorkflowHost::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            executor,
            locks,
            clock,
            config,
        ));

        Self {
            store,
            registry,
            bus,
            controller,
            host,
        }
    }

    /// Run the store's initialization hook.
    pub async fn initialize(&self) -> Result<(), EngineError> {
        self.store.ensure_store_exists().await?;
        Ok(())
    }

    pub fn register(&self, definition: WorkflowDefinition) -> Result<(), EngineError> {
        Ok(self.registry.register(definition)?)
    }

    pub fn controller(&self) -> &WorkflowController<P> {
        &self.controller
    }

    pub fn store(&self) -> &Arc<P> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<DefinitionRegistry> {
        &self.registry
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.bus.subscribe()
    }

    /// Run a single host cycle.
    pub async fn poll_once(&self) -> Result<PollSummary, EngineError> {
        self.host.poll_once().await
    }

    /// Spawn the host loop on the current runtime.
    pub fn start(&self) -> JoinHandle<()> {
        let host = Arc::clone(&self.host);
        tokio::spawn(async move { host.run().await })
    }

    pub fn stop(&self) {
        self.host.stop();
    }
}
