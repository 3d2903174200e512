//! Lifecycle notifications for observers of the engine.
//!
//! Provides a `LifecycleBus` that distributes `LifecycleEvent` messages to all
//! subscribers via a `tokio::sync::broadcast` channel.

pub mod bus;

pub use bus::LifecycleBus;
