//! Workflow domain types for Waypoint.
//!
//! A `WorkflowInstance` is the authoritative persisted record of one running
//! (or finished) occurrence of a workflow definition. Its progress is tracked
//! by an ordered list of `ExecutionPointer`s, one per step that has been
//! reached. Step failures are recorded separately as append-only
//! `ExecutionError` rows and joined back in at read time as
//! `WorkflowInstance::execution_error_count`.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Workflow Instance
// ---------------------------------------------------------------------------

/// Lifecycle status of a workflow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Runnable,
    Running,
    Suspended,
    Complete,
    Terminated,
}

impl WorkflowStatus {
    /// Complete and Terminated are terminal; nothing schedules them again.
    pub fn is_finished(&self) -> bool {
        matches!(self, WorkflowStatus::Complete | WorkflowStatus::Terminated)
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkflowStatus::Runnable => "runnable",
            WorkflowStatus::Running => "running",
            WorkflowStatus::Suspended => "suspended",
            WorkflowStatus::Complete => "complete",
            WorkflowStatus::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// One occurrence of a workflow definition with its own execution state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    /// Store-assigned id. Empty until `create_new_workflow` returns.
    pub id: String,
    /// Id of the workflow definition being executed.
    pub workflow_definition_id: String,
    /// Version of the workflow definition being executed.
    pub version: u32,
    /// Optional free-text description supplied at start.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Current lifecycle status.
    pub status: WorkflowStatus,
    /// Arbitrary instance data shared by all steps.
    pub data: serde_json::Value,
    /// When the host should next pick this instance up. `None` means the
    /// instance is not scheduled for polling (finished, suspended, or only
    /// waiting on events).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_execution: Option<DateTime<Utc>>,
    /// When the instance was created.
    pub create_time: DateTime<Utc>,
    /// When the instance reached Complete or Terminated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complete_time: Option<DateTime<Utc>>,
    /// Ordered execution pointers.
    #[serde(default)]
    pub execution_pointers: Vec<ExecutionPointer>,
    /// Number of recorded execution errors. Computed by the store at read
    /// time from the error log; whatever value is written is ignored.
    #[serde(default)]
    pub execution_error_count: usize,
}

impl WorkflowInstance {
    /// Build a fresh, runnable instance with no pointers and no id.
    pub fn new(
        workflow_definition_id: impl Into<String>,
        version: u32,
        data: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: String::new(),
            workflow_definition_id: workflow_definition_id.into(),
            version,
            description: None,
            status: WorkflowStatus::Runnable,
            data,
            next_execution: Some(now),
            create_time: now,
            complete_time: None,
            execution_pointers: Vec::new(),
            execution_error_count: 0,
        }
    }

    /// Whether the instance is due at `as_of` (`next_execution <= as_of`).
    pub fn is_due(&self, as_of: DateTime<Utc>) -> bool {
        self.next_execution.is_some_and(|next| next <= as_of)
    }

    pub fn pointer(&self, pointer_id: &str) -> Option<&ExecutionPointer> {
        self.execution_pointers.iter().find(|p| p.id == pointer_id)
    }

    pub fn pointer_mut(&mut self, pointer_id: &str) -> Option<&mut ExecutionPointer> {
        self.execution_pointers.iter_mut().find(|p| p.id == pointer_id)
    }

    /// Pointers that still have work to do (including ones waiting on events).
    pub fn active_pointers(&self) -> impl Iterator<Item = &ExecutionPointer> {
        self.execution_pointers.iter().filter(|p| p.active)
    }
}

// ---------------------------------------------------------------------------
// Execution Pointer
// ---------------------------------------------------------------------------

/// Status of a single execution pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointerStatus {
    Pending,
    Running,
    Complete,
    Sleeping,
    WaitingForEvent,
    Failed,
    Compensated,
    Cancelled,
}

/// Cursor tracking progress through one step of a workflow instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPointer {
    /// UUIDv7 pointer id.
    pub id: String,
    /// Index of the step within the workflow definition.
    pub step_id: usize,
    /// Step name (denormalized for display and logs).
    pub step_name: String,
    /// Current pointer status.
    pub status: PointerStatus,
    /// Whether the pointer still needs attention from the executor.
    pub active: bool,
    /// Number of retries scheduled so far.
    #[serde(default)]
    pub retry_count: u32,
    /// Earliest time the pointer may run again (retry delay or sleep).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep_until: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Name of the event this pointer is waiting for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_name: Option<String>,
    /// Key of the event this pointer is waiting for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_key: Option<String>,
    /// Set once a matching event has been delivered.
    #[serde(default)]
    pub event_published: bool,
    /// Payload of the delivered event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_data: Option<serde_json::Value>,
}

impl ExecutionPointer {
    /// Create an active, pending pointer for the given step.
    pub fn new(step_id: usize, step_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            step_id,
            step_name: step_name.into(),
            status: PointerStatus::Pending,
            active: true,
            retry_count: 0,
            sleep_until: None,
            start_time: None,
            end_time: None,
            event_name: None,
            event_key: None,
            event_published: false,
            event_data: None,
        }
    }

    /// Whether the executor should run this pointer at `now`.
    ///
    /// A pointer waiting for an event only becomes due once the event has
    /// been delivered.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if !self.active {
            return false;
        }
        let runnable_status = match self.status {
            PointerStatus::Pending | PointerStatus::Running | PointerStatus::Sleeping => true,
            PointerStatus::WaitingForEvent => self.event_published,
            _ => false,
        };
        runnable_status && self.sleep_until.is_none_or(|t| t <= now)
    }

    /// Whether the pointer is parked on an undelivered event.
    pub fn is_waiting_for_event(&self) -> bool {
        self.active && self.status == PointerStatus::WaitingForEvent && !self.event_published
    }

    /// Mark the pointer finished with the given terminal status.
    pub fn finish(&mut self, status: PointerStatus, now: DateTime<Utc>) {
        self.status = status;
        self.active = false;
        self.sleep_until = None;
        self.end_time = Some(now);
    }
}

// ---------------------------------------------------------------------------
// Error Policy
// ---------------------------------------------------------------------------

/// What the engine does when a step body fails.
///
/// Internally tagged by `type` so it reads naturally in TOML:
/// ```toml
/// [default_error_behavior]
/// type = "retry"
/// interval_secs = 30
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// The first unhandled failure ends the instance.
    Terminate,
    /// Re-attempt the same pointer after a delay. `None` uses the engine's
    /// configured default interval.
    Retry {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        interval_secs: Option<u64>,
    },
    /// Park the instance as Suspended until it is explicitly resumed.
    Suspend,
    /// Run the step's compensation body, then move on.
    Compensate,
}

impl ErrorPolicy {
    /// Retry after a fixed number of seconds.
    pub fn retry_after(secs: u64) -> Self {
        ErrorPolicy::Retry {
            interval_secs: Some(secs),
        }
    }
}

impl Default for ErrorPolicy {
    fn default() -> Self {
        ErrorPolicy::Retry {
            interval_secs: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Execution Error
// ---------------------------------------------------------------------------

/// Append-only record of one step-body failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionError {
    /// Owning workflow instance id.
    pub workflow_id: String,
    /// Pointer that was executing when the failure happened.
    pub execution_pointer_id: String,
    /// When the failure was recorded.
    pub error_time: DateTime<Utc>,
    /// Rendered error description.
    pub message: String,
}

impl ExecutionError {
    pub fn new(
        workflow_id: impl Into<String>,
        execution_pointer_id: impl Into<String>,
        message: impl Into<String>,
        error_time: DateTime<Utc>,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            execution_pointer_id: execution_pointer_id.into(),
            error_time,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
