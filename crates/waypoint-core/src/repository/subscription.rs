//! Event subscription repository trait definition.

use chrono::{DateTime, Utc};
use waypoint_types::error::PersistenceError;
use waypoint_types::event::EventSubscription;

/// Repository trait for the subscription index.
pub trait SubscriptionRepository: Send + Sync {
    /// Assign a fresh id, insert, and return the id.
    fn create_event_subscription(
        &self,
        subscription: &EventSubscription,
    ) -> impl std::future::Future<Output = Result<String, PersistenceError>> + Send;

    /// Subscriptions with exactly this name and key whose `subscribe_as_of`
    /// is `<= as_of`.
    fn get_subscriptions(
        &self,
        event_name: &str,
        event_key: &str,
        as_of: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<Vec<EventSubscription>, PersistenceError>> + Send;

    /// Remove the subscription with this id.
    ///
    /// Fails with `NotFound` when nothing matches and `Ambiguous` when more
    /// than one record shares the id.
    fn terminate_subscription(
        &self,
        subscription_id: &str,
    ) -> impl std::future::Future<Output = Result<(), PersistenceError>> + Send;
}
