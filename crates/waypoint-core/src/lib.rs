//! Persistence-and-scheduling core for Waypoint.
//!
//! This crate defines the storage contract ("ports") that persistence
//! providers implement, plus everything that consumes it: the error policy
//! engine, the pointer executor, the workflow controller, and the polling
//! host loop. It depends only on `waypoint-types` -- never on
//! `waypoint-infra` or any concrete store.

pub mod clock;
pub mod engine;
pub mod error;
pub mod event;
pub mod repository;
pub mod workflow;
