//! Observability utilities.
//!
//! Pipelines log through `tracing`: every stage worker runs inside a
//! `fnpipe.worker` span carrying its group and worker name. This module only
//! installs a subscriber for binaries and tests that want to see them.

mod subscriber;

pub use subscriber::{init_tracing, LogFormat, TracingConfig};
