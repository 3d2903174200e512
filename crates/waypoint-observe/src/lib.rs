//! Observability setup for processes embedding the Waypoint engine.

pub mod tracing_setup;

pub use tracing_setup::{LogFormat, TracingError, TracingOptions, init_tracing, shutdown_tracing};
