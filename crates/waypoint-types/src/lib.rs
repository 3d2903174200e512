//! Shared domain types for Waypoint.
//!
//! This crate contains the persisted entities of the workflow engine:
//! workflow instances and their execution pointers, external events, event
//! subscriptions, execution errors, plus engine configuration and the
//! storage-contract error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod event;
pub mod workflow;
