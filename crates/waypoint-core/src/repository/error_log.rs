//! Execution error log repository trait definition.

use waypoint_types::error::PersistenceError;
use waypoint_types::workflow::ExecutionError;

/// Repository trait for the append-only error log.
pub trait ErrorLogRepository: Send + Sync {
    /// Whether this store actually keeps execution errors.
    ///
    /// Stores that return `false` must still accept `persist_errors` (as a
    /// no-op) so callers' write paths never fail because of it.
    fn supports_persisting_errors(&self) -> bool;

    /// Append errors in order.
    fn persist_errors(
        &self,
        errors: &[ExecutionError],
    ) -> impl std::future::Future<Output = Result<(), PersistenceError>> + Send;

    /// All errors recorded for an instance, in insertion order.
    fn get_execution_errors(
        &self,
        workflow_id: &str,
    ) -> impl std::future::Future<Output = Result<Vec<ExecutionError>, PersistenceError>> + Send;
}
