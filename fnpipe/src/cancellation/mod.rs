//! Structured cancellation for pipeline workers.
//!
//! This module provides:
//! - CancellationToken for cooperative, hierarchical cancellation
//! - WorkerGroup for spawning related workers and latching the first failure

mod task_group;
mod token;

pub use task_group::WorkerGroup;
pub use token::{CancelCallback, CancellationToken};
