//! Workflow definitions: ordered steps with async bodies and per-step error
//! handling.
//!
//! A definition is code, not data. Steps are closures returning a boxed
//! future, so a definition lives only in the process that registered it; the
//! persisted instance refers to it by `(workflow_definition_id, version)`.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures_util::future::BoxFuture;
use thiserror::Error;
use waypoint_types::workflow::{ErrorPolicy, ExecutionPointer};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while defining, registering, or resolving workflows.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    #[error("workflow definition not found: {id} (version {version})")]
    DefinitionNotFound { id: String, version: String },

    #[error("workflow definition already registered: {id} v{version}")]
    DuplicateDefinition { id: String, version: u32 },

    #[error("workflow definition has no steps: {0}")]
    EmptyDefinition(String),
}

// ---------------------------------------------------------------------------
// Step bodies
// ---------------------------------------------------------------------------

/// What a step body sees when it runs.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub workflow_id: String,
    pub pointer_id: String,
    pub step_id: usize,
    pub step_name: String,
    /// Snapshot of the instance data at the time the step started.
    pub data: serde_json::Value,
    /// Payload of the event this pointer was waiting for, once delivered.
    pub event_data: Option<serde_json::Value>,
    /// Number of failed attempts so far.
    pub retry_count: u32,
}

/// Result of a successful step body.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// The step is done; move to the next step.
    Next,
    /// Replace the instance data, then move to the next step.
    Output(serde_json::Value),
    /// Hold the pointer for the given duration, then move on without
    /// re-running the body.
    Sleep(Duration),
    /// Park the pointer until a matching event arrives; the body is re-run
    /// with `StepContext::event_data` set.
    WaitForEvent {
        event_name: String,
        event_key: String,
        /// Only events at or after this time match. Defaults to the
        /// instance's creation time.
        effective_time: Option<DateTime<Utc>>,
    },
}

impl StepOutcome {
    pub fn wait_for(event_name: impl Into<String>, event_key: impl Into<String>) -> Self {
        StepOutcome::WaitForEvent {
            event_name: event_name.into(),
            event_key: event_key.into(),
            effective_time: None,
        }
    }
}

/// Type-erased async step body.
pub type StepFn =
    Arc<dyn Fn(StepContext) -> BoxFuture<'static, anyhow::Result<StepOutcome>> + Send + Sync>;

/// Predicate that stops retrying a failing step.
///
/// Receives the current instance data and the failing pointer (before its
/// retry count is bumped for this failure).
pub type CancelCondition =
    Arc<dyn Fn(&serde_json::Value, &ExecutionPointer) -> bool + Send + Sync>;

/// Box an async closure into a `StepFn`.
pub fn step_fn<F, Fut>(f: F) -> StepFn
where
    F: Fn(StepContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<StepOutcome>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

// ---------------------------------------------------------------------------
// StepDefinition
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct StepDefinition {
    /// Position within the definition, assigned on `WorkflowDefinition::step`.
    pub id: usize,
    pub name: String,
    pub body: StepFn,
    /// Policy applied when `body` fails. `None` means the engine default.
    pub on_error: Option<ErrorPolicy>,
    pub cancel_when: Option<CancelCondition>,
    pub compensate_with: Option<StepFn>,
}

impl StepDefinition {
    pub fn new(name: impl Into<String>, body: StepFn) -> Self {
        Self {
            id: 0,
            name: name.into(),
            body,
            on_error: None,
            cancel_when: None,
            compensate_with: None,
        }
    }

    pub fn on_error(mut self, policy: ErrorPolicy) -> Self {
        self.on_error = Some(policy);
        self
    }

    pub fn cancel_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&serde_json::Value, &ExecutionPointer) -> bool + Send + Sync + 'static,
    {
        self.cancel_when = Some(Arc::new(predicate));
        self
    }

    pub fn compensate_with(mut self, body: StepFn) -> Self {
        self.compensate_with = Some(body);
        self
    }
}

impl fmt::Debug for StepDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepDefinition")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("on_error", &self.on_error)
            .field("has_cancel_condition", &self.cancel_when.is_some())
            .field("has_compensation", &self.compensate_with.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// WorkflowDefinition
// ---------------------------------------------------------------------------

/// An ordered list of steps identified by `(id, version)`.
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    pub id: String,
    pub version: u32,
    pub description: Option<String>,
    steps: Vec<StepDefinition>,
}

impl WorkflowDefinition {
    pub fn new(id: impl Into<String>, version: u32) -> Self {
        Self {
            id: id.into(),
            version,
            description: None,
            steps: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Append a step. Its id is its position.
    pub fn step(mut self, mut step: StepDefinition) -> Self {
        step.id = self.steps.len();
        self.steps.push(step);
        self
    }

    pub fn steps(&self) -> &[StepDefinition] {
        &self.steps
    }

    pub fn get_step(&self, step_id: usize) -> Option<&StepDefinition> {
        self.steps.get(step_id)
    }

    pub fn first_step(&self) -> Option<&StepDefinition> {
        self.steps.first()
    }

    /// The step that follows `step_id`, if any.
    pub fn next_step(&self, step_id: usize) -> Option<&StepDefinition> {
        self.steps.get(step_id + 1)
    }
}
