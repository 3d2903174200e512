//! Storage contract (ports).
//!
//! These traits define the storage interface that persistence providers
//! implement. The reference in-memory provider lives in `waypoint-infra`; any
//! other backing store (SQL or otherwise) must reproduce the same filtering,
//! matching, and fault semantics to be a drop-in replacement.
//!
//! The contract is split by collection. `PersistenceProvider` ties the four
//! together and is what the host, executor, and controller are generic over.

pub mod error_log;
pub mod event;
pub mod subscription;
pub mod workflow;

use waypoint_types::error::PersistenceError;

pub use error_log::ErrorLogRepository;
pub use event::EventRepository;
pub use subscription::SubscriptionRepository;
pub use workflow::{InstanceFilter, WorkflowRepository};

/// A complete backing store for the engine.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait PersistenceProvider:
    WorkflowRepository + SubscriptionRepository + EventRepository + ErrorLogRepository
{
    /// Create tables, directories, or whatever else the store needs.
    ///
    /// Must be idempotent. The default does nothing.
    fn ensure_store_exists(
        &self,
    ) -> impl std::future::Future<Output = Result<(), PersistenceError>> + Send {
        async { Ok(()) }
    }
}
