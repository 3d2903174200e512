//! Top-level error type for engine operations.

use thiserror::Error;
use waypoint_types::error::PersistenceError;

use crate::workflow::definition::WorkflowError;

/// Errors surfaced by the controller and the host loop.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),
}

impl EngineError {
    /// True when the underlying cause is a missing record.
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::Persistence(e) if e.is_not_found())
    }
}
