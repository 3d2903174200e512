//! Workflow instance repository trait definition.

use chrono::{DateTime, Utc};
use waypoint_types::error::PersistenceError;
use waypoint_types::workflow::{WorkflowInstance, WorkflowStatus};

/// Filter criteria for listing workflow instances.
///
/// Every predicate is optional and applied only when present; predicates are
/// combined with AND.
#[derive(Debug, Clone, Default)]
pub struct InstanceFilter {
    /// Filter by lifecycle status.
    pub status: Option<WorkflowStatus>,
    /// Filter by workflow definition id.
    pub definition_id: Option<String>,
    /// Only instances created at or after this time.
    pub created_from: Option<DateTime<Utc>>,
    /// Only instances created at or before this time.
    pub created_to: Option<DateTime<Utc>>,
}

impl InstanceFilter {
    /// Whether `instance` satisfies every present predicate.
    pub fn matches(&self, instance: &WorkflowInstance) -> bool {
        self.status.is_none_or(|s| instance.status == s)
            && self
                .definition_id
                .as_deref()
                .is_none_or(|d| instance.workflow_definition_id == d)
            && self.created_from.is_none_or(|from| instance.create_time >= from)
            && self.created_to.is_none_or(|to| instance.create_time <= to)
    }
}

/// Repository trait for workflow instance persistence.
///
/// `execution_error_count` on every returned instance is computed at read
/// time from the error log; providers must never store it.
pub trait WorkflowRepository: Send + Sync {
    /// Assign a fresh unique id, insert the instance, and return the id.
    ///
    /// Any id already present on `instance` is ignored.
    fn create_new_workflow(
        &self,
        instance: &WorkflowInstance,
    ) -> impl std::future::Future<Output = Result<String, PersistenceError>> + Send;

    /// Replace the stored instance with the same id, atomically.
    ///
    /// Readers never observe the id missing or duplicated. Fails with
    /// `NotFound` when no instance has that id.
    fn persist_workflow(
        &self,
        instance: &WorkflowInstance,
    ) -> impl std::future::Future<Output = Result<(), PersistenceError>> + Send;

    /// Ids of instances whose `next_execution` is present and `<= as_of`.
    fn get_runnable_instances(
        &self,
        as_of: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<Vec<String>, PersistenceError>> + Send;

    /// Load exactly one instance. Fails with `NotFound` for unknown ids.
    fn get_workflow_instance(
        &self,
        id: &str,
    ) -> impl std::future::Future<Output = Result<WorkflowInstance, PersistenceError>> + Send;

    /// Bulk load. Unknown ids are dropped, duplicate ids yield one instance,
    /// and an empty id list yields an empty result.
    fn get_workflow_instances_by_ids(
        &self,
        ids: &[String],
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowInstance>, PersistenceError>> + Send;

    /// Filtered, paginated listing ordered by creation time ascending (ties
    /// broken by insertion order). `skip`/`take` apply after filtering.
    fn get_workflow_instances(
        &self,
        filter: &InstanceFilter,
        skip: usize,
        take: usize,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowInstance>, PersistenceError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn empty_filter_matches_everything() {
        let wf = WorkflowInstance::new("order", 1, json!(null), Utc::now());
        assert!(InstanceFilter::default().matches(&wf));
    }

    #[test]
    fn filter_predicates_are_conjunctive() {
        let now = Utc::now();
        let wf = WorkflowInstance::new("order", 1, json!(null), now);

        let filter = InstanceFilter {
            status: Some(WorkflowStatus::Runnable),
            definition_id: Some("order".to_string()),
            created_from: Some(now - Duration::minutes(1)),
            created_to: Some(now),
        };
        assert!(filter.matches(&wf));

        let wrong_def = InstanceFilter {
            definition_id: Some("invoice".to_string()),
            ..filter.clone()
        };
        assert!(!wrong_def.matches(&wf));

        let too_late = InstanceFilter {
            created_from: Some(now + Duration::seconds(1)),
            ..filter
        };
        assert!(!too_late.matches(&wf));
    }
}
