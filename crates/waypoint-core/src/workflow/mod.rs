//! Workflow engine: definitions, error policies, execution, and scheduling.
//!
//! - `definition` -- step bodies, outcomes, and workflow definitions
//! - `registry` -- versioned definition lookup
//! - `retry` -- error policy engine
//! - `executor` -- advances one instance's execution pointers
//! - `lock` -- in-process per-instance locks
//! - `controller` -- start, publish, suspend, resume, terminate
//! - `host` -- polling loop and worker pool

pub mod controller;
pub mod definition;
pub mod executor;
pub mod host;
pub mod lock;
pub mod registry;
pub mod retry;
