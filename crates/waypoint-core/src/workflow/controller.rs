//! Client-facing workflow operations.
//!
//! Starting instances, publishing events, and status changes. Every change is
//! a load, modify, persist round-trip through the store; the controller keeps
//! no state of its own beyond its collaborators.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use waypoint_types::event::{Event, LifecycleEvent};
use waypoint_types::workflow::{ExecutionPointer, PointerStatus, WorkflowInstance, WorkflowStatus};

use super::executor::next_execution;
use super::lock::InstanceLocks;
use super::registry::DefinitionRegistry;
use crate::clock::Clock;
use crate::error::EngineError;
use crate::event::LifecycleBus;
use crate::repository::PersistenceProvider;

pub struct WorkflowController<P> {
    store: Arc<P>,
    registry: Arc<DefinitionRegistry>,
    locks: Arc<InstanceLocks>,
    clock: Arc<dyn Clock>,
    bus: LifecycleBus,
}

impl<P: PersistenceProvider> WorkflowController<P> {
    pub fn new(
        store: Arc<P>,
        registry: Arc<DefinitionRegistry>,
        locks: Arc<InstanceLocks>,
        clock: Arc<dyn Clock>,
        bus: LifecycleBus,
    ) -> Self {
        Self {
            store,
            registry,
            locks,
            clock,
            bus,
        }
    }

    /// Create a runnable instance of a registered definition and return its id.
    ///
    /// `version: None` picks the latest registered version.
    pub async fn start_workflow(
        &self,
        definition_id: &str,
        version: Option<u32>,
        data: serde_json::Value,
    ) -> Result<String, EngineError> {
        let definition = self.registry.resolve(definition_id, version)?;
        let now = self.clock.now();

        let mut instance = WorkflowInstance::new(&definition.id, definition.version, data, now);
        instance.description = definition.description.clone();
        if let Some(first) = definition.first_step() {
            instance
                .execution_pointers
                .push(ExecutionPointer::new(first.id, first.name.clone()));
        }

        let id = self.store.create_new_workflow(&instance).await?;
        tracing::info!(
            workflow_id = %id,
            definition_id = %definition.id,
            version = definition.version,
            "workflow started"
        );
        self.bus.publish(LifecycleEvent::WorkflowStarted {
            workflow_id: id.clone(),
            definition_id: definition.id.clone(),
            version: definition.version,
        });
        Ok(id)
    }

    /// Record an external event; the host delivers it to matching
    /// subscriptions. `effective_time` defaults to now.
    pub async fn publish_event(
        &self,
        event_name: &str,
        event_key: &str,
        data: serde_json::Value,
        effective_time: Option<DateTime<Utc>>,
    ) -> Result<String, EngineError> {
        let time = effective_time.unwrap_or_else(|| self.clock.now());
        let event = Event::new(event_name, event_key, data, time);
        let id = self.store.create_event(&event).await?;
        tracing::debug!(event_id = %id, %event_name, %event_key, "event published");
        Ok(id)
    }

    /// Park a runnable instance. Returns `false` if it is not runnable.
    pub async fn suspend_workflow(&self, id: &str) -> Result<bool, EngineError> {
        let _guard = self.locks.acquire(id).await;
        let mut instance = self.store.get_workflow_instance(id).await?;
        if instance.status != WorkflowStatus::Runnable {
            return Ok(false);
        }

        instance.status = WorkflowStatus::Suspended;
        instance.next_execution = None;
        self.store.persist_workflow(&instance).await?;

        tracing::info!(workflow_id = %id, "workflow suspended");
        self.bus.publish(LifecycleEvent::WorkflowSuspended {
            workflow_id: id.to_string(),
        });
        Ok(true)
    }

    /// Make a suspended instance runnable again. Returns `false` if it is not
    /// suspended.
    pub async fn resume_workflow(&self, id: &str) -> Result<bool, EngineError> {
        let _guard = self.locks.acquire(id).await;
        let mut instance = self.store.get_workflow_instance(id).await?;
        if instance.status != WorkflowStatus::Suspended {
            return Ok(false);
        }

        let now = self.clock.now();
        instance.status = WorkflowStatus::Runnable;
        instance.next_execution = next_execution(&instance, now);
        self.store.persist_workflow(&instance).await?;

        tracing::info!(workflow_id = %id, "workflow resumed");
        self.bus.publish(LifecycleEvent::WorkflowResumed {
            workflow_id: id.to_string(),
        });
        Ok(true)
    }

    /// Stop an instance for good. Returns `false` if it already finished.
    pub async fn terminate_workflow(&self, id: &str) -> Result<bool, EngineError> {
        let _guard = self.locks.acquire(id).await;
        let mut instance = self.store.get_workflow_instance(id).await?;
        if instance.status.is_finished() {
            return Ok(false);
        }

        let now = self.clock.now();
        let mut waits = Vec::new();
        for pointer in instance.execution_pointers.iter_mut().filter(|p| p.active) {
            if pointer.is_waiting_for_event() {
                if let (Some(name), Some(key)) = (&pointer.event_name, &pointer.event_key) {
                    waits.push((pointer.id.clone(), name.clone(), key.clone()));
                }
            }
            pointer.finish(PointerStatus::Cancelled, now);
        }
        instance.status = WorkflowStatus::Terminated;
        instance.next_execution = None;
        instance.complete_time = Some(now);
        self.store.persist_workflow(&instance).await?;

        for (pointer_id, event_name, event_key) in waits {
            self.cancel_subscriptions(&pointer_id, &event_name, &event_key)
                .await?;
        }

        tracing::info!(workflow_id = %id, "workflow terminated");
        self.bus.publish(LifecycleEvent::WorkflowTerminated {
            workflow_id: id.to_string(),
        });
        Ok(true)
    }

    pub async fn get_workflow(&self, id: &str) -> Result<WorkflowInstance, EngineError> {
        Ok(self.store.get_workflow_instance(id).await?)
    }

    /// Drop the subscriptions a cancelled pointer was waiting on.
    async fn cancel_subscriptions(
        &self,
        pointer_id: &str,
        event_name: &str,
        event_key: &str,
    ) -> Result<(), EngineError> {
        let subscriptions = self
            .store
            .get_subscriptions(event_name, event_key, DateTime::<Utc>::MAX_UTC)
            .await?;
        for subscription in subscriptions
            .iter()
            .filter(|s| s.execution_pointer_id == pointer_id)
        {
            match self.store.terminate_subscription(&subscription.id).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
