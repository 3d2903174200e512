//! Host loop: polls the store and dispatches due work.
//!
//! Each cycle first delivers due events to waiting instances, then runs every
//! runnable instance on a bounded worker pool. Faults inside a cycle are
//! logged and never stop the loop.

use std::sync::Arc;

use chrono::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use waypoint_types::config::EngineConfig;
use waypoint_types::error::PersistenceError;
use waypoint_types::event::{Event, EventSubscription};
use waypoint_types::workflow::WorkflowStatus;

use super::executor::WorkflowExecutor;
use super::lock::InstanceLocks;
use super::registry::DefinitionRegistry;
use super::retry::schedule_after;
use crate::clock::Clock;
use crate::error::EngineError;
use crate::repository::PersistenceProvider;

/// Counts from one `poll_once` cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollSummary {
    /// Events marked processed this cycle.
    pub events_processed: usize,
    /// Instances a worker ran this cycle.
    pub instances_run: usize,
    /// Due instances skipped because another worker held them.
    pub instances_skipped: usize,
}

/// How long an instance with no registered definition waits before the host
/// looks at it again.
const MISSING_DEFINITION_BACKOFF: Duration = Duration::minutes(1);

pub struct WorkflowHost<P> {
    store: Arc<P>,
    registry: Arc<DefinitionRegistry>,
    executor: Arc<WorkflowExecutor<P>>,
    locks: Arc<InstanceLocks>,
    clock: Arc<dyn Clock>,
    workers: Arc<Semaphore>,
    config: EngineConfig,
    cancel: CancellationToken,
}

impl<P: PersistenceProvider + 'static> WorkflowHost<P> {
    pub fn new(
        store: Arc<P>,
        registry: Arc<DefinitionRegistry>,
        executor: Arc<WorkflowExecutor<P>>,
        locks: Arc<InstanceLocks>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        let workers = Arc::new(Semaphore::new(config.worker_count()));
        Self {
            store,
            registry,
            executor,
            locks,
            clock,
            workers,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Poll until `stop` is called.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(
            poll_interval_ms = self.config.poll_interval_ms,
            workers = self.config.worker_count(),
            "workflow host started"
        );

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        tracing::error!(error = %e, "poll cycle failed");
                    }
                }
            }
        }

        tracing::info!("workflow host stopped");
    }

    /// Ask `run` to exit after the current cycle.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// One full cycle: deliver due events, then run due instances.
    ///
    /// Waits for every worker it spawned before returning.
    pub async fn poll_once(&self) -> Result<PollSummary, EngineError> {
        let mut summary = PollSummary {
            events_processed: self.process_events().await?,
            ..PollSummary::default()
        };

        let now = self.clock.now();
        let runnable = self.store.get_runnable_instances(now).await?;
        if !runnable.is_empty() {
            tracing::debug!(count = runnable.len(), "runnable instances found");
        }

        let mut join_set = JoinSet::new();
        for id in runnable {
            let Some(guard) = self.locks.try_acquire(&id) else {
                tracing::debug!(workflow_id = %id, "instance locked, skipping");
                summary.instances_skipped += 1;
                continue;
            };
            let Ok(permit) = Arc::clone(&self.workers).acquire_owned().await else {
                break;
            };

            let store = Arc::clone(&self.store);
            let registry = Arc::clone(&self.registry);
            let executor = Arc::clone(&self.executor);
            let clock = Arc::clone(&self.clock);
            join_set.spawn(async move {
                let _permit = permit;
                let _guard = guard;
                match run_instance(&*store, &registry, &executor, &*clock, &id).await {
                    Ok(ran) => ran,
                    Err(e) => {
                        tracing::error!(workflow_id = %id, error = %e, "workflow worker failed");
                        false
                    }
                }
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(true) => summary.instances_run += 1,
                Ok(false) => {}
                Err(e) => tracing::error!(error = %e, "workflow worker panicked"),
            }
        }

        Ok(summary)
    }

    /// Deliver every due event. Returns how many were marked processed.
    async fn process_events(&self) -> Result<usize, PersistenceError> {
        let now = self.clock.now();
        let mut processed = 0;

        for event_id in self.store.get_runnable_events(now).await? {
            let Some(event) = self.store.get_event(&event_id).await? else {
                continue;
            };
            if event.is_processed {
                continue;
            }

            let subscriptions = self
                .store
                .get_subscriptions(&event.event_name, &event.event_key, event.event_time)
                .await?;

            let mut delivered_all = true;
            for subscription in &subscriptions {
                match self.deliver(&event, subscription).await {
                    Ok(true) => {}
                    Ok(false) => delivered_all = false,
                    Err(e) => {
                        tracing::error!(
                            event_id = %event.id,
                            subscription_id = %subscription.id,
                            error = %e,
                            "event delivery failed"
                        );
                        delivered_all = false;
                    }
                }
            }

            if delivered_all {
                self.store.mark_event_processed(&event.id).await?;
                processed += 1;
                tracing::debug!(
                    event_id = %event.id,
                    event_name = %event.event_name,
                    event_key = %event.event_key,
                    subscribers = subscriptions.len(),
                    "event processed"
                );
            }
        }

        Ok(processed)
    }

    /// Hand `event` to the pointer behind `subscription`.
    ///
    /// Returns `false` when the instance is busy; the event stays unprocessed
    /// and is retried next cycle.
    async fn deliver(
        &self,
        event: &Event,
        subscription: &EventSubscription,
    ) -> Result<bool, PersistenceError> {
        let Some(_guard) = self.locks.try_acquire(&subscription.workflow_id) else {
            tracing::debug!(
                workflow_id = %subscription.workflow_id,
                event_id = %event.id,
                "instance locked, deferring event"
            );
            return Ok(false);
        };

        let mut instance = match self.store.get_workflow_instance(&subscription.workflow_id).await {
            Ok(instance) => Some(instance),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        if let Some(instance) = instance.as_mut() {
            let waiting = instance
                .pointer_mut(&subscription.execution_pointer_id)
                .filter(|p| p.is_waiting_for_event());
            match waiting {
                Some(pointer) => {
                    pointer.event_published = true;
                    pointer.event_data = Some(event.event_data.clone());
                    if instance.status == WorkflowStatus::Runnable {
                        instance.next_execution = Some(self.clock.now());
                    }
                    self.store.persist_workflow(instance).await?;
                    tracing::debug!(
                        workflow_id = %instance.id,
                        event_id = %event.id,
                        "event delivered"
                    );
                }
                None => {
                    tracing::warn!(
                        workflow_id = %subscription.workflow_id,
                        subscription_id = %subscription.id,
                        "subscription has no waiting pointer, discarding"
                    );
                }
            }
        }

        match self.store.terminate_subscription(&subscription.id).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_not_found() => Ok(true),
            Err(e) => Err(e),
        }
    }
}

/// Load, execute, and persist one instance. Returns `false` when there was
/// nothing to do.
async fn run_instance<P: PersistenceProvider>(
    store: &P,
    registry: &DefinitionRegistry,
    executor: &WorkflowExecutor<P>,
    clock: &dyn Clock,
    id: &str,
) -> Result<bool, EngineError> {
    let mut instance = store.get_workflow_instance(id).await?;
    let now = clock.now();
    if instance.status != WorkflowStatus::Runnable || !instance.is_due(now) {
        return Ok(false);
    }

    let Some(definition) = registry.get(&instance.workflow_definition_id, Some(instance.version))
    else {
        tracing::warn!(
            workflow_id = %id,
            definition_id = %instance.workflow_definition_id,
            version = instance.version,
            "no registered definition for instance, backing off"
        );
        instance.next_execution = Some(schedule_after(now, MISSING_DEFINITION_BACKOFF));
        store.persist_workflow(&instance).await?;
        return Ok(false);
    };

    let report = executor.execute(&mut instance, &definition).await;
    if let Some(fault) = report.fault {
        if !report.errors.is_empty() {
            store.persist_errors(&report.errors).await?;
        }
        return Err(fault.into());
    }

    store.persist_workflow(&instance).await?;
    if !report.errors.is_empty() {
        store.persist_errors(&report.errors).await?;
    }

    tracing::debug!(
        workflow_id = %id,
        status = %instance.status,
        steps_run = report.steps_run,
        errors = report.errors.len(),
        "workflow pass finished"
    );
    Ok(true)
}
