//! Terminal stages: consume the pipeline and report its outcome.
//!
//! A terminal runs on the caller's task rather than a spawned worker, then
//! joins every upstream worker. The pipeline's first error is returned.

use super::handle::Pipeline;
use crate::cancellation::CancellationToken;
use crate::errors::{PipelineError, Result};
use std::future::Future;
use tracing::{debug, Instrument};

impl<T: Send + 'static> Pipeline<T> {
    /// Consumes every value with `consume` and waits for the pipeline to end.
    ///
    /// Returns `Ok(())` once every value has been consumed, or the first error
    /// raised by any stage.
    pub async fn sink<F, Fut>(self, mut consume: F) -> Result<()>
    where
        F: FnMut(CancellationToken, T) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        let Self { scope, mut values } = self;
        let worker = scope.worker_name("sink");
        let token = scope.token().clone();

        let outcome = async {
            while let Some(value) = values.recv(&token).await? {
                consume(token.clone(), value)
                    .await
                    .map_err(|e| PipelineError::from_caller(e, &token))?;
            }
            Result::Ok(())
        }
        .instrument(tracing::debug_span!("fnpipe.worker", group = %scope.config().name, worker = %worker))
        .await;

        drop(values);
        let result = scope.finish(&worker, outcome).await;
        debug!(pipeline = %scope.config().name, run_id = %scope.run_id(), ok = result.is_ok(), "Pipeline finished");
        result
    }

    /// Folds every value into an accumulator starting from `initial`.
    ///
    /// On failure the partial accumulator is discarded; use
    /// [`reduce_partial`](Self::reduce_partial) to keep it.
    pub async fn reduce<O, F, Fut>(self, initial: O, mut fold: F) -> Result<O>
    where
        F: FnMut(CancellationToken, O, T) -> Fut,
        Fut: Future<Output = anyhow::Result<O>>,
    {
        let Self { scope, mut values } = self;
        let worker = scope.worker_name("reduce");
        let token = scope.token().clone();

        let outcome = async {
            let mut acc = initial;
            while let Some(value) = values.recv(&token).await? {
                acc = fold(token.clone(), acc, value)
                    .await
                    .map_err(|e| PipelineError::from_caller(e, &token))?;
            }
            Result::Ok(acc)
        }
        .instrument(tracing::debug_span!("fnpipe.worker", group = %scope.config().name, worker = %worker))
        .await;

        drop(values);
        match outcome {
            Ok(acc) => {
                scope.finish(&worker, Ok(())).await?;
                Ok(acc)
            }
            Err(error) => Err(scope.finish_failed(&worker, error).await),
        }
    }

    /// Like [`reduce`](Self::reduce), but always hands back the accumulator.
    ///
    /// The returned accumulator is the last one successfully produced: the
    /// initial value if nothing was folded, and never the input to a failing
    /// fold call.
    pub async fn reduce_partial<O, F, Fut>(self, initial: O, mut fold: F) -> (O, Result<()>)
    where
        O: Clone,
        F: FnMut(CancellationToken, O, T) -> Fut,
        Fut: Future<Output = anyhow::Result<O>>,
    {
        let Self { scope, mut values } = self;
        let worker = scope.worker_name("reduce");
        let token = scope.token().clone();
        let mut acc = initial;

        let outcome = async {
            while let Some(value) = values.recv(&token).await? {
                acc = fold(token.clone(), acc.clone(), value)
                    .await
                    .map_err(|e| PipelineError::from_caller(e, &token))?;
            }
            Result::Ok(())
        }
        .instrument(tracing::debug_span!("fnpipe.worker", group = %scope.config().name, worker = %worker))
        .await;

        drop(values);
        let result = scope.finish(&worker, outcome).await;
        (acc, result)
    }

    /// Gathers every value into a `Vec`, in arrival order.
    pub async fn collect(self) -> Result<Vec<T>> {
        self.reduce(Vec::new(), |_token, mut acc, value| {
            acc.push(value);
            std::future::ready(anyhow::Ok(acc))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{assert_cancelled, assert_stage_error, InjectedError, NAMES};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[tokio::test]
    async fn test_sink_sees_every_value_in_order() {
        let token = CancellationToken::new();
        let mut seen = Vec::new();

        Pipeline::from_iter(&token, NAMES)
            .sink(|_token, name| {
                seen.push(name.to_string());
                async { anyhow::Ok(()) }
            })
            .await
            .unwrap();

        assert_eq!(seen, NAMES.map(String::from).to_vec());
    }

    #[tokio::test]
    async fn test_sink_error() {
        let token = CancellationToken::new();

        let result = Pipeline::from_iter(&token, NAMES)
            .sink(|_token, name| async move {
                if name == "charlie" {
                    Err(InjectedError("sink").into())
                } else {
                    anyhow::Ok(())
                }
            })
            .await;

        assert_stage_error(&result, &InjectedError("sink"));
    }

    #[tokio::test]
    async fn test_reduce_counts_names() {
        let token = CancellationToken::new();

        let total = Pipeline::from_iter(&token, NAMES)
            .reduce(0usize, |_token, acc, name| async move { anyhow::Ok(acc + name.len()) })
            .await
            .unwrap();

        assert_eq!(total, 5 + 3 + 7 + 5 + 4);
    }

    #[tokio::test]
    async fn test_reduce_empty_returns_initial() {
        let token = CancellationToken::new();

        let total = Pipeline::from_iter(&token, Vec::<u32>::new())
            .reduce(42u32, |_token, acc, n| async move { anyhow::Ok(acc + n) })
            .await
            .unwrap();

        assert_eq!(total, 42);
    }

    #[tokio::test]
    async fn test_reduce_partial_keeps_last_good_accumulator() {
        let token = CancellationToken::new();

        let (acc, result) = Pipeline::from_iter(&token, 1..=5)
            .reduce_partial(0, |_token, acc, n: i32| async move {
                if n == 4 {
                    Err(InjectedError("reduce").into())
                } else {
                    anyhow::Ok(acc + n)
                }
            })
            .await;

        assert_eq!(acc, 6);
        assert_stage_error(&result, &InjectedError("reduce"));
    }

    #[tokio::test]
    async fn test_reduce_partial_upstream_failure() {
        let token = CancellationToken::new();

        let (acc, result) = Pipeline::from_iter(&token, 1..=5)
            .map(|_token, n: i32| async move {
                if n == 3 {
                    Err(InjectedError("map").into())
                } else {
                    anyhow::Ok(n)
                }
            })
            .reduce_partial(Vec::new(), |_token, mut acc, n| async move {
                acc.push(n);
                anyhow::Ok(acc)
            })
            .await;

        assert_stage_error(&result, &InjectedError("map"));
        assert!(acc == vec![1, 2] || acc == vec![1] || acc.is_empty(), "unexpected {acc:?}");
    }

    #[tokio::test]
    async fn test_reduce_partial_cancelled_before_start() {
        let token = CancellationToken::new();
        token.cancel("too late");

        let (acc, result) = Pipeline::from_iter(&token, 1..=5)
            .reduce_partial(100, |_token, acc, n: i32| async move { anyhow::Ok(acc + n) })
            .await;

        assert_eq!(acc, 100);
        assert_cancelled(&result);
    }

    #[tokio::test]
    async fn test_collect_waits_for_slow_stages() {
        let token = CancellationToken::new();

        let values = Pipeline::from_iter(&token, 0..5u64)
            .map(|_token, n| async move {
                tokio::time::sleep(Duration::from_millis(n)).await;
                anyhow::Ok(n * 10)
            })
            .collect()
            .await
            .unwrap();

        assert_eq!(values, vec![0, 10, 20, 30, 40]);
    }

    #[tokio::test]
    async fn test_terminal_cancels_its_own_pipeline() {
        let token = CancellationToken::new();

        let pipeline = Pipeline::from_iter(&token, 0..);
        let scope = pipeline.scope().clone();
        let result = pipeline
            .sink(move |_token, n: u64| {
                if n == 3 {
                    scope.cancel("seen enough");
                }
                async { anyhow::Ok(()) }
            })
            .await;

        let err = result.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(err.to_string(), "Pipeline cancelled: seen enough");
        assert!(!token.is_cancelled());
    }
}
