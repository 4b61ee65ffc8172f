//! # fnpipe
//!
//! Typed, concurrent stream pipelines on Tokio.
//!
//! A pipeline is a chain of stages connected by small bounded queues:
//!
//! - **Sources** produce values from a generator or an iterator
//! - **Stages** filter, map and flatten values, sequentially or in parallel
//! - **Terminals** consume values and report the pipeline's outcome
//!
//! Every stage of one pipeline shares a cancellation token. The first stage
//! to fail cancels the others, and that first error is what the terminal
//! returns.
//!
//! ## Quick Start
//!
//! ```no_run
//! use fnpipe::prelude::*;
//!
//! # async fn demo() -> fnpipe::errors::Result<()> {
//! let token = CancellationToken::new();
//!
//! let lengths = Pipeline::from_iter(&token, ["alice", "bob", "charlie"])
//!     .filter(|_token, name| async move { anyhow::Ok(name.contains('a')) })
//!     .parallel_map(|_token, name| async move { anyhow::Ok(name.len()) })
//!     .collect()
//!     .await?;
//!
//! assert_eq!(lengths.len(), 2);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod errors;
pub mod observability;
pub mod pipeline;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::{CancellationToken, WorkerGroup};
    pub use crate::errors::PipelineError;
    pub use crate::pipeline::{Emitter, Pipeline, PipelineConfig, PipelineScope};
}

pub use cancellation::CancellationToken;
pub use errors::{PipelineError, Result};
pub use pipeline::{Pipeline, PipelineConfig};
