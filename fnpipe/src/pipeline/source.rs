//! Source stages: the entry points that create a pipeline scope.

use super::config::PipelineConfig;
use super::handle::{Pipeline, PipelineScope};
use super::queue::{handoff, HandoffSender};
use crate::cancellation::CancellationToken;
use crate::errors::{PipelineError, Result};
use std::future::Future;

/// Pushes values from a source generator into the pipeline.
///
/// The emitter is moved into the generator; the source queue closes when the
/// generator's future completes and the emitter is dropped with it.
pub struct Emitter<T> {
    sender: HandoffSender<T>,
    token: CancellationToken,
}

impl<T> Emitter<T> {
    /// Emits a value, waiting until the next stage accepts it.
    ///
    /// Fails with [`PipelineError::Cancelled`] if the pipeline is cancelled
    /// first. Generators should stop on error; propagating it with `?` makes
    /// the source report the cancellation as is.
    pub async fn emit(&self, value: T) -> Result<()> {
        self.sender.send(value, &self.token).await
    }

    /// Returns the pipeline's cancellation token.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl<T> std::fmt::Debug for Emitter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter").field("token", &self.token).finish()
    }
}

impl<T: Send + 'static> Pipeline<T> {
    /// Starts a pipeline whose values are produced by `generate`.
    ///
    /// The pipeline's token is a child of `token`: cancelling `token` cancels
    /// the pipeline, while a failing stage never cancels `token`. Returns
    /// immediately; `generate` runs on its own worker.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// ```no_run
    /// use fnpipe::prelude::*;
    ///
    /// # async fn demo() -> fnpipe::errors::Result<()> {
    /// let token = CancellationToken::new();
    /// let total = Pipeline::source(&token, |_token, emitter| async move {
    ///     for n in 1..=10u64 {
    ///         emitter.emit(n).await?;
    ///     }
    ///     anyhow::Ok(())
    /// })
    /// .reduce(0, |_token, acc, n| async move { anyhow::Ok(acc + n) })
    /// .await?;
    /// assert_eq!(total, 55);
    /// # Ok(())
    /// # }
    /// ```
    pub fn source<F, Fut>(token: &CancellationToken, generate: F) -> Self
    where
        F: FnOnce(CancellationToken, Emitter<T>) -> Fut,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::source_with_config(token, PipelineConfig::default(), generate)
    }

    /// Like [`source`](Self::source) with an explicit configuration.
    pub fn source_with_config<F, Fut>(
        token: &CancellationToken,
        config: PipelineConfig,
        generate: F,
    ) -> Self
    where
        F: FnOnce(CancellationToken, Emitter<T>) -> Fut,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let scope = PipelineScope::new(token, config);
        let (tx, rx) = handoff(scope.config().effective_queue_capacity());
        let name = scope.worker_name("source");

        scope.spawn(&name, move |token| {
            let emitter = Emitter {
                sender: tx,
                token: token.clone(),
            };
            let generating = generate(token.clone(), emitter);
            async move {
                generating
                    .await
                    .map_err(|e| PipelineError::from_caller(e, &token))
            }
        });

        Self { scope, values: rx }
    }

    /// Starts a pipeline that emits every item of `items` in order.
    pub fn from_iter<I>(token: &CancellationToken, items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        Self::from_iter_with_config(token, PipelineConfig::default(), items)
    }

    /// Like [`from_iter`](Self::from_iter) with an explicit configuration.
    pub fn from_iter_with_config<I>(
        token: &CancellationToken,
        config: PipelineConfig,
        items: I,
    ) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        let items = items.into_iter();
        Self::source_with_config(token, config, move |_token, emitter| async move {
            for item in items {
                emitter.emit(item).await?;
            }
            anyhow::Ok(())
        })
    }
}
