//! Concurrency-safe in-memory implementation of the storage contract.
//!
//! Each collection is its own concurrency region:
//!
//! - instances: `DashMap` keyed by id; a persist replaces the value in place
//!   under the key's shard lock, so readers never see the id missing
//! - events: `DashMap` keyed by id; processed toggles are in-place updates
//! - subscriptions: `RwLock<Vec<_>>`, scanned linearly
//! - errors: `RwLock<Vec<_>>`, append-only
//!
//! No operation holds two of these at once. The error-count join reads the
//! error log after the instance copies have been taken; since errors are
//! append-only, a concurrent append can only make a count stale-but-lower,
//! never wrong in the other direction.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::RwLock;
use uuid::Uuid;
use waypoint_core::repository::{
    ErrorLogRepository, EventRepository, InstanceFilter, PersistenceProvider,
    SubscriptionRepository, WorkflowRepository,
};
use waypoint_types::error::{PersistenceError, SingleResult};
use waypoint_types::event::{Event, EventSubscription};
use waypoint_types::workflow::{ExecutionError, WorkflowInstance};

const INSTANCE: &str = "workflow instance";
const SUBSCRIPTION: &str = "event subscription";

/// A stored instance plus its insertion sequence, used to break creation-time
/// ties in listings.
#[derive(Debug, Clone)]
struct StoredInstance {
    seq: u64,
    instance: WorkflowInstance,
}

/// In-memory `PersistenceProvider`.
#[derive(Debug)]
pub struct MemoryPersistenceProvider {
    instances: DashMap<String, StoredInstance>,
    subscriptions: RwLock<Vec<EventSubscription>>,
    events: DashMap<String, Event>,
    errors: RwLock<Vec<ExecutionError>>,
    next_seq: AtomicU64,
    persist_errors: bool,
}

impl MemoryPersistenceProvider {
    pub fn new() -> Self {
        Self {
            instances: DashMap::new(),
            subscriptions: RwLock::new(Vec::new()),
            events: DashMap::new(),
            errors: RwLock::new(Vec::new()),
            next_seq: AtomicU64::new(0),
            persist_errors: true,
        }
    }

    /// A store that reports no error-persistence support and drops errors.
    pub fn without_error_persistence() -> Self {
        Self {
            persist_errors: false,
            ..Self::new()
        }
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub async fn subscription_count(&self) -> usize {
        self.subscriptions.read().await.len()
    }

    fn new_id() -> String {
        Uuid::now_v7().to_string()
    }

    async fn error_count(&self, workflow_id: &str) -> usize {
        self.errors
            .read()
            .await
            .iter()
            .filter(|e| e.workflow_id == workflow_id)
            .count()
    }

    /// Fill in `execution_error_count` for a batch with one pass over the log.
    async fn attach_error_counts(&self, instances: &mut [WorkflowInstance]) {
        if instances.is_empty() {
            return;
        }
        let wanted: HashSet<&str> = instances.iter().map(|i| i.id.as_str()).collect();
        let mut counts: HashMap<String, usize> = HashMap::new();
        for error in self.errors.read().await.iter() {
            if wanted.contains(error.workflow_id.as_str()) {
                *counts.entry(error.workflow_id.clone()).or_default() += 1;
            }
        }
        drop(wanted);
        for instance in instances.iter_mut() {
            instance.execution_error_count = counts.get(&instance.id).copied().unwrap_or(0);
        }
    }
}

impl Default for MemoryPersistenceProvider {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Instances
// ---------------------------------------------------------------------------

impl WorkflowRepository for MemoryPersistenceProvider {
    async fn create_new_workflow(
        &self,
        instance: &WorkflowInstance,
    ) -> Result<String, PersistenceError> {
        let id = Self::new_id();
        let mut stored = instance.clone();
        stored.id = id.clone();
        stored.execution_error_count = 0;

        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        self.instances.insert(
            id.clone(),
            StoredInstance {
                seq,
                instance: stored,
            },
        );
        Ok(id)
    }

    async fn persist_workflow(&self, instance: &WorkflowInstance) -> Result<(), PersistenceError> {
        let mut entry = self
            .instances
            .get_mut(&instance.id)
            .ok_or_else(|| PersistenceError::not_found(INSTANCE, &instance.id))?;

        let mut replacement = instance.clone();
        replacement.execution_error_count = 0;
        entry.instance = replacement;
        Ok(())
    }

    async fn get_runnable_instances(
        &self,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<String>, PersistenceError> {
        Ok(self
            .instances
            .iter()
            .filter(|entry| entry.instance.is_due(as_of))
            .map(|entry| entry.key().clone())
            .collect())
    }

    async fn get_workflow_instance(&self, id: &str) -> Result<WorkflowInstance, PersistenceError> {
        let mut instance = self
            .instances
            .get(id)
            .map(|entry| entry.instance.clone())
            .ok_or_else(|| PersistenceError::not_found(INSTANCE, id))?;

        instance.execution_error_count = self.error_count(id).await;
        Ok(instance)
    }

    async fn get_workflow_instances_by_ids(
        &self,
        ids: &[String],
    ) -> Result<Vec<WorkflowInstance>, PersistenceError> {
        let mut seen = HashSet::new();
        let mut found: Vec<WorkflowInstance> = ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .filter_map(|id| self.instances.get(id).map(|entry| entry.instance.clone()))
            .collect();

        self.attach_error_counts(&mut found).await;
        Ok(found)
    }

    async fn get_workflow_instances(
        &self,
        filter: &InstanceFilter,
        skip: usize,
        take: usize,
    ) -> Result<Vec<WorkflowInstance>, PersistenceError> {
        let mut matching: Vec<StoredInstance> = self
            .instances
            .iter()
            .filter(|entry| filter.matches(&entry.instance))
            .map(|entry| entry.value().clone())
            .collect();
        matching.sort_by_key(|stored| (stored.instance.create_time, stored.seq));

        let mut page: Vec<WorkflowInstance> = matching
            .into_iter()
            .skip(skip)
            .take(take)
            .map(|stored| stored.instance)
            .collect();

        self.attach_error_counts(&mut page).await;
        Ok(page)
    }
}

// ---------------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------------

impl SubscriptionRepository for MemoryPersistenceProvider {
    async fn create_event_subscription(
        &self,
        subscription: &EventSubscription,
    ) -> Result<String, PersistenceError> {
        let id = Self::new_id();
        let mut stored = subscription.clone();
        stored.id = id.clone();
        self.subscriptions.write().await.push(stored);
        Ok(id)
    }

    async fn get_subscriptions(
        &self,
        event_name: &str,
        event_key: &str,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<EventSubscription>, PersistenceError> {
        Ok(self
            .subscriptions
            .read()
            .await
            .iter()
            .filter(|s| s.matches(event_name, event_key, as_of))
            .cloned()
            .collect())
    }

    async fn terminate_subscription(&self, subscription_id: &str) -> Result<(), PersistenceError> {
        let mut subscriptions = self.subscriptions.write().await;
        let position = SingleResult::from_matches(
            subscriptions
                .iter()
                .enumerate()
                .filter(|(_, s)| s.id == subscription_id)
                .map(|(i, _)| i),
        )
        .into_result(SUBSCRIPTION, subscription_id)?;

        subscriptions.remove(position);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

impl EventRepository for MemoryPersistenceProvider {
    async fn create_event(&self, event: &Event) -> Result<String, PersistenceError> {
        let id = Self::new_id();
        let mut stored = event.clone();
        stored.id = id.clone();
        self.events.insert(id.clone(), stored);
        Ok(id)
    }

    async fn get_event(&self, id: &str) -> Result<Option<Event>, PersistenceError> {
        Ok(self.events.get(id).map(|entry| entry.value().clone()))
    }

    async fn mark_event_processed(&self, id: &str) -> Result<(), PersistenceError> {
        if let Some(mut event) = self.events.get_mut(id) {
            event.is_processed = true;
        }
        Ok(())
    }

    async fn mark_event_unprocessed(&self, id: &str) -> Result<(), PersistenceError> {
        if let Some(mut event) = self.events.get_mut(id) {
            event.is_processed = false;
        }
        Ok(())
    }

    async fn get_runnable_events(
        &self,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<String>, PersistenceError> {
        let mut due: Vec<(DateTime<Utc>, String)> = self
            .events
            .iter()
            .filter(|e| !e.is_processed && e.event_time <= as_of)
            .map(|e| (e.event_time, e.key().clone()))
            .collect();
        due.sort();
        Ok(due.into_iter().map(|(_, id)| id).collect())
    }

    async fn get_events(
        &self,
        event_name: &str,
        event_key: &str,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<String>, PersistenceError> {
        Ok(self
            .events
            .iter()
            .filter(|e| e.event_name == event_name && e.event_key == event_key)
            .filter(|e| e.event_time >= as_of)
            .map(|e| e.key().clone())
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Error log
// ---------------------------------------------------------------------------

impl ErrorLogRepository for MemoryPersistenceProvider {
    fn supports_persisting_errors(&self) -> bool {
        self.persist_errors
    }

    async fn persist_errors(&self, errors: &[ExecutionError]) -> Result<(), PersistenceError> {
        if !self.persist_errors || errors.is_empty() {
            return Ok(());
        }
        self.errors.write().await.extend_from_slice(errors);
        Ok(())
    }

    async fn get_execution_errors(
        &self,
        workflow_id: &str,
    ) -> Result<Vec<ExecutionError>, PersistenceError> {
        Ok(self
            .errors
            .read()
            .await
            .iter()
            .filter(|e| e.workflow_id == workflow_id)
            .cloned()
            .collect())
    }
}

impl PersistenceProvider for MemoryPersistenceProvider {}
