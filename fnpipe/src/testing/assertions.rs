//! Test assertions for pipeline outcomes.

use crate::errors::{PipelineError, Result};
use std::fmt::Debug;

/// Asserts that the pipeline ended with a cancellation error.
pub fn assert_cancelled<T: Debug>(result: &Result<T>) {
    match result {
        Err(PipelineError::Cancelled { .. }) => {}
        other => panic!("Expected cancellation, got: {other:?}"),
    }
}

/// Asserts that the pipeline failed with exactly `expected` from a caller function.
pub fn assert_stage_error<T, E>(result: &Result<T>, expected: &E)
where
    T: Debug,
    E: std::fmt::Display + Debug + PartialEq + Send + Sync + 'static,
{
    let Err(error) = result else {
        panic!("Expected stage error {expected:?}, got: {result:?}");
    };
    assert_eq!(
        error.downcast_ref::<E>(),
        Some(expected),
        "Expected stage error {:?}, got {:?}",
        expected,
        error
    );
}

/// Asserts that the pipeline failed because `worker` panicked.
pub fn assert_panicked<T: Debug>(result: &Result<T>, worker: &str) {
    match result {
        Err(PipelineError::Panicked { worker: actual, .. }) => assert!(
            actual.starts_with(worker),
            "Expected panic in worker '{worker}', got '{actual}'"
        ),
        other => panic!("Expected panic in worker '{worker}', got: {other:?}"),
    }
}
