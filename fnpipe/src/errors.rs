//! Error types for fnpipe pipelines.
//!
//! A pipeline surfaces exactly one error to its caller: the first failure
//! recorded by the pipeline's worker group. Caller-function errors travel
//! through untouched inside [`PipelineError::Stage`].

use crate::cancellation::CancellationToken;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// The error returned by terminal stages and by [`Emitter::emit`].
///
/// [`Emitter::emit`]: crate::pipeline::Emitter::emit
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A caller-supplied function (generator, predicate, transform, fold or
    /// consumer) failed.
    #[error(transparent)]
    Stage(anyhow::Error),

    /// The pipeline scope was cancelled before the worker finished.
    #[error("Pipeline cancelled: {reason}")]
    Cancelled {
        /// The first reason recorded on the cancellation token.
        reason: String,
    },

    /// A worker panicked.
    #[error("Worker '{worker}' panicked: {message}")]
    Panicked {
        /// Name of the stage worker.
        worker: String,
        /// Panic payload, if it was a string.
        message: String,
    },
}

impl PipelineError {
    /// Creates a cancellation error.
    #[must_use]
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled {
            reason: reason.into(),
        }
    }

    /// Creates a panic error.
    #[must_use]
    pub fn panicked(worker: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Panicked {
            worker: worker.into(),
            message: message.into(),
        }
    }

    /// Wraps a caller-function error as is.
    #[must_use]
    pub fn from_stage(error: anyhow::Error) -> Self {
        Self::Stage(error)
    }

    /// Converts the error returned by a caller function running under `token`.
    ///
    /// A cancellation error while `token` is cancelled is this scope's own
    /// cancellation (typically a failed `emit` propagated with `?`) and is
    /// reported as `token.error()`. Anything else, including a cancellation
    /// coming from an unrelated inner pipeline, stays a [`Stage`](Self::Stage)
    /// error with its context intact.
    pub(crate) fn from_caller(error: anyhow::Error, token: &CancellationToken) -> Self {
        let own_cancellation = token.is_cancelled()
            && error
                .downcast_ref::<Self>()
                .is_some_and(PipelineError::is_cancelled);
        if own_cancellation {
            token.error()
        } else {
            Self::Stage(error)
        }
    }

    /// Returns true if this is a cancellation error.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Returns the caller-function error, if this is a stage failure.
    #[must_use]
    pub fn stage_error(&self) -> Option<&anyhow::Error> {
        match self {
            Self::Stage(error) => Some(error),
            _ => None,
        }
    }

    /// Downcasts the caller-function error to a concrete type.
    #[must_use]
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
    {
        self.stage_error().and_then(|error| error.downcast_ref::<E>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error, PartialEq, Eq)]
    #[error("boom")]
    struct Boom;

    #[test]
    fn test_stage_error_is_transparent() {
        let err = PipelineError::from_stage(anyhow::Error::new(Boom));

        assert_eq!(err.to_string(), "boom");
        assert_eq!(err.downcast_ref::<Boom>(), Some(&Boom));
        assert!(!err.is_cancelled());
    }

    #[test]
    fn test_from_caller_unwraps_own_cancellation() {
        let token = CancellationToken::new();
        token.cancel("stop");
        let emitted = anyhow::Error::new(token.error()).context("while emitting");

        let err = PipelineError::from_caller(emitted, &token);

        assert!(err.is_cancelled());
        assert!(err.stage_error().is_none());
        assert_eq!(err.to_string(), "Pipeline cancelled: stop");
    }

    #[test]
    fn test_from_caller_keeps_foreign_cancellation() {
        let token = CancellationToken::new();
        let inner = anyhow::Error::new(PipelineError::cancelled("inner run"))
            .context("lookup pipeline failed");

        let err = PipelineError::from_caller(inner, &token);

        assert!(!err.is_cancelled());
        assert_eq!(err.to_string(), "lookup pipeline failed");
        assert!(err.downcast_ref::<PipelineError>().is_some_and(PipelineError::is_cancelled));
    }

    #[test]
    fn test_from_caller_wraps_plain_errors_under_cancellation() {
        let token = CancellationToken::new();
        token.cancel("stop");

        let err = PipelineError::from_caller(anyhow::Error::new(Boom), &token);

        assert_eq!(err.downcast_ref::<Boom>(), Some(&Boom));
    }

    #[test]
    fn test_panicked_display() {
        let err = PipelineError::panicked("map", "index out of bounds");
        assert_eq!(err.to_string(), "Worker 'map' panicked: index out of bounds");
    }

    #[test]
    fn test_downcast_wrong_type() {
        let err = PipelineError::from_stage(anyhow::anyhow!("plain message"));
        assert!(err.downcast_ref::<Boom>().is_none());
    }
}
