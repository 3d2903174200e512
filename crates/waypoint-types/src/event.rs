//! External events, event subscriptions, and lifecycle notifications.
//!
//! `Event` and `EventSubscription` are persisted by the storage contract.
//! `LifecycleEvent` is the in-process notification type broadcast by the
//! engine; it is Clone + Send + Sync for use with tokio broadcast channels and
//! is never persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::workflow::{ErrorPolicy, WorkflowStatus};

// ---------------------------------------------------------------------------
// External events
// ---------------------------------------------------------------------------

/// An external signal published into the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Store-assigned id. Empty until `create_event` returns.
    pub id: String,
    pub event_name: String,
    pub event_key: String,
    /// Payload handed to the waiting step.
    #[serde(default)]
    pub event_data: serde_json::Value,
    /// When the event occurred (or becomes effective).
    pub event_time: DateTime<Utc>,
    /// Whether the host has already dispatched this event.
    #[serde(default)]
    pub is_processed: bool,
}

impl Event {
    pub fn new(
        event_name: impl Into<String>,
        event_key: impl Into<String>,
        event_data: serde_json::Value,
        event_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: String::new(),
            event_name: event_name.into(),
            event_key: event_key.into(),
            event_data,
            event_time,
            is_processed: false,
        }
    }
}

/// A standing registration that a waiting pointer should be resumed when a
/// matching event arrives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSubscription {
    /// Store-assigned id. Empty until `create_event_subscription` returns.
    pub id: String,
    /// Instance that owns the waiting pointer.
    pub workflow_id: String,
    /// Step index of the waiting pointer.
    pub step_id: usize,
    /// The waiting pointer.
    pub execution_pointer_id: String,
    pub event_name: String,
    pub event_key: String,
    /// Earliest event time this subscription matches.
    pub subscribe_as_of: DateTime<Utc>,
}

impl EventSubscription {
    /// Name and key equal, and `subscribe_as_of <= event_time`.
    pub fn matches(&self, event_name: &str, event_key: &str, event_time: DateTime<Utc>) -> bool {
        self.event_name == event_name
            && self.event_key == event_key
            && self.subscribe_as_of <= event_time
    }
}

// ---------------------------------------------------------------------------
// Lifecycle notifications
// ---------------------------------------------------------------------------

/// Notifications emitted while the engine drives workflow instances.
///
/// Used by the lifecycle bus to inform observers (logging, UIs, tests).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    WorkflowStarted {
        workflow_id: String,
        definition_id: String,
        version: u32,
    },

    WorkflowCompleted { workflow_id: String },

    WorkflowTerminated { workflow_id: String },

    WorkflowSuspended { workflow_id: String },

    WorkflowResumed { workflow_id: String },

    StepStarted {
        workflow_id: String,
        execution_pointer_id: String,
        step_id: usize,
        step_name: String,
    },

    StepCompleted {
        workflow_id: String,
        execution_pointer_id: String,
        step_id: usize,
        step_name: String,
    },

    /// A step body failed and the error policy was applied.
    StepFailed {
        workflow_id: String,
        execution_pointer_id: String,
        step_id: usize,
        error: String,
        policy: ErrorPolicy,
        /// Status of the instance after the policy was applied.
        resulting_status: WorkflowStatus,
    },
}

impl LifecycleEvent {
    /// The workflow instance this notification refers to.
    pub fn workflow_id(&self) -> &str {
        match self {
            LifecycleEvent::WorkflowStarted { workflow_id, .. }
            | LifecycleEvent::WorkflowCompleted { workflow_id }
            | LifecycleEvent::WorkflowTerminated { workflow_id }
            | LifecycleEvent::WorkflowSuspended { workflow_id }
            | LifecycleEvent::WorkflowResumed { workflow_id }
            | LifecycleEvent::StepStarted { workflow_id, .. }
            | LifecycleEvent::StepCompleted { workflow_id, .. }
            | LifecycleEvent::StepFailed { workflow_id, .. } => workflow_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn subscription(as_of: DateTime<Utc>) -> EventSubscription {
        EventSubscription {
            id: "sub-1".to_string(),
            workflow_id: "wf-1".to_string(),
            step_id: 1,
            execution_pointer_id: "ptr-1".to_string(),
            event_name: "payment".to_string(),
            event_key: "order-42".to_string(),
            subscribe_as_of: as_of,
        }
    }

    #[test]
    fn test_subscription_matches_exact_name_key_and_time() {
        let now = Utc::now();
        let sub = subscription(now);

        assert!(sub.matches("payment", "order-42", now));
        assert!(sub.matches("payment", "order-42", now + Duration::seconds(1)));
        assert!(!sub.matches("payment", "order-42", now - Duration::seconds(1)));
        assert!(!sub.matches("payment", "order-43", now));
        assert!(!sub.matches("Payment", "order-42", now));
    }

    #[test]
    fn test_new_event_is_unprocessed() {
        let evt = Event::new("payment", "order-42", serde_json::json!({"ok": true}), Utc::now());
        assert!(evt.id.is_empty());
        assert!(!evt.is_processed);
    }

    #[test]
    fn test_lifecycle_event_tagging() {
        let event = LifecycleEvent::StepFailed {
            workflow_id: "wf-1".to_string(),
            execution_pointer_id: "ptr-1".to_string(),
            step_id: 0,
            error: "boom".to_string(),
            policy: ErrorPolicy::Terminate,
            resulting_status: WorkflowStatus::Terminated,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "step_failed");
        assert_eq!(json["policy"]["type"], "terminate");
        assert_eq!(event.workflow_id(), "wf-1");
    }
}
