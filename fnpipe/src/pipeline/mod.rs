//! Pipeline building and execution.
//!
//! This module provides:
//! - Sources that start a pipeline from a generator or an iterator
//! - Sequential stages (filter, map, flatten)
//! - Parallel stages with optional fan-out limits
//! - Terminal stages that join the pipeline and report its first error

mod config;
mod handle;
mod parallel;
mod queue;
mod sequential;
mod source;
mod terminal;


pub use config::PipelineConfig;
pub use handle::{Pipeline, PipelineScope};
pub use source::Emitter;
