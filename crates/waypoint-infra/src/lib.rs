//! Infrastructure layer for Waypoint.
//!
//! Contains implementations of the storage contract defined in
//! `waypoint-core` (the concurrency-safe in-memory store) and the
//! `waypoint.toml` configuration loader.

pub mod config;
pub mod memory;
