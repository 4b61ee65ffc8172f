//! Testing utilities for fnpipe pipelines.
//!
//! This module provides:
//! - Shared fixtures and injectable errors
//! - Assertions on pipeline outcomes
//! - A probe for measuring stage concurrency

mod assertions;
mod fixtures;
mod probes;

pub use assertions::{assert_cancelled, assert_panicked, assert_stage_error};
pub use fixtures::{InjectedError, NAMES};
pub use probes::{ConcurrencyGuard, ConcurrencyProbe};
