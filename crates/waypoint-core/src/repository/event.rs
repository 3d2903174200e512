//! External event repository trait definition.

use chrono::{DateTime, Utc};
use waypoint_types::error::PersistenceError;
use waypoint_types::event::Event;

/// Repository trait for the event store.
///
/// Note the asymmetric time comparisons: `get_runnable_events` answers "what
/// is due now or earlier" for dispatch, while `get_events` answers "what
/// occurred at or after a reference point" for catch-up scans.
pub trait EventRepository: Send + Sync {
    /// Assign a fresh id, insert, and return the id.
    fn create_event(
        &self,
        event: &Event,
    ) -> impl std::future::Future<Output = Result<String, PersistenceError>> + Send;

    /// Load an event, or `None` if the id is unknown.
    fn get_event(
        &self,
        id: &str,
    ) -> impl std::future::Future<Output = Result<Option<Event>, PersistenceError>> + Send;

    /// Set `is_processed`. Unknown ids are a silent no-op.
    fn mark_event_processed(
        &self,
        id: &str,
    ) -> impl std::future::Future<Output = Result<(), PersistenceError>> + Send;

    /// Clear `is_processed`. Unknown ids are a silent no-op.
    fn mark_event_unprocessed(
        &self,
        id: &str,
    ) -> impl std::future::Future<Output = Result<(), PersistenceError>> + Send;

    /// Ids of unprocessed events with `event_time <= as_of`.
    fn get_runnable_events(
        &self,
        as_of: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<Vec<String>, PersistenceError>> + Send;

    /// Ids of events with this name and key and `event_time >= as_of`,
    /// regardless of processed state.
    fn get_events(
        &self,
        event_name: &str,
        event_key: &str,
        as_of: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<Vec<String>, PersistenceError>> + Send;
}
