//! Parallel stages: one sub-worker per value, output order not preserved.
//!
//! The stage worker owns a nested worker group whose token is a child of the
//! pipeline token. A failing sub-worker cancels its siblings through that
//! nested token; the stage worker then stops reading input, joins the nested
//! group and fails with the nested group's first error.

use super::handle::Pipeline;
use crate::cancellation::{CancellationToken, WorkerGroup};
use crate::errors::{PipelineError, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

impl<T: Send + 'static> Pipeline<T> {
    /// Like [`map`](Self::map), but transforms values concurrently.
    ///
    /// Fan-out is bounded by [`PipelineConfig::max_parallelism`]
    /// (unbounded by default). Outputs arrive in completion order.
    ///
    /// [`PipelineConfig::max_parallelism`]: super::PipelineConfig::max_parallelism
    pub fn parallel_map<O, F, Fut>(self, transform: F) -> Pipeline<O>
    where
        O: Send + 'static,
        F: Fn(CancellationToken, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
    {
        let limit = self.scope.config().max_parallelism;
        self.parallel_map_with(limit, transform)
    }

    /// Like [`parallel_map`](Self::parallel_map) with at most `limit` values in flight.
    pub fn parallel_map_limited<O, F, Fut>(self, limit: usize, transform: F) -> Pipeline<O>
    where
        O: Send + 'static,
        F: Fn(CancellationToken, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
    {
        self.parallel_map_with(Some(limit), transform)
    }

    /// Like [`filter`](Self::filter), but evaluates the predicate concurrently.
    ///
    /// Kept values arrive in completion order.
    pub fn parallel_filter<F, Fut>(self, predicate: F) -> Self
    where
        T: Clone,
        F: Fn(CancellationToken, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        let limit = self.scope.config().max_parallelism;
        self.parallel_filter_with(limit, predicate)
    }

    /// Like [`parallel_filter`](Self::parallel_filter) with at most `limit` values in flight.
    pub fn parallel_filter_limited<F, Fut>(self, limit: usize, predicate: F) -> Self
    where
        T: Clone,
        F: Fn(CancellationToken, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        self.parallel_filter_with(Some(limit), predicate)
    }

    fn parallel_map_with<O, F, Fut>(self, limit: Option<usize>, transform: F) -> Pipeline<O>
    where
        O: Send + 'static,
        F: Fn(CancellationToken, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
    {
        self.fan_out("parallel_map", limit, move |token, value| {
            let mapping = transform(token, value);
            async move { mapping.await.map(Some) }
        })
    }

    fn parallel_filter_with<F, Fut>(self, limit: Option<usize>, predicate: F) -> Self
    where
        T: Clone,
        F: Fn(CancellationToken, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        self.fan_out("parallel_filter", limit, move |token, value: T| {
            let checking = predicate(token, value.clone());
            async move { anyhow::Ok(checking.await?.then_some(value)) }
        })
    }

    /// Runs `work` on a sub-worker per value; `Some` results are forwarded.
    fn fan_out<O, F, Fut>(self, stage: &'static str, limit: Option<usize>, work: F) -> Pipeline<O>
    where
        O: Send + 'static,
        F: Fn(CancellationToken, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Option<O>>> + Send + 'static,
    {
        let work = Arc::new(work);
        let permits = limit.map(|limit| Arc::new(Semaphore::new(limit.max(1))));
        let nested_name = format!("{}/{stage}", self.scope.config().name);

        self.chain(stage, move |token, mut input, output| async move {
            let nested = WorkerGroup::new(nested_name, &token);
            let mut interrupted = false;

            loop {
                let value = match input.recv(nested.token()).await {
                    Ok(Some(value)) => value,
                    Ok(None) => break,
                    Err(_) => {
                        interrupted = true;
                        break;
                    }
                };

                let permit = match &permits {
                    None => None,
                    Some(permits) => tokio::select! {
                        biased;
                        () = nested.token().cancelled() => {
                            interrupted = true;
                            break;
                        }
                        permit = permits.clone().acquire_owned() => permit.ok(),
                    },
                };

                let work = work.clone();
                let output = output.clone();
                nested.spawn(stage, move |sub_token| async move {
                    let _permit = permit;
                    let produced = (*work)(sub_token.clone(), value)
                        .await
                        .map_err(|e| PipelineError::from_caller(e, &sub_token))?;
                    if let Some(produced) = produced {
                        output.send(produced, &sub_token).await?;
                    }
                    Result::Ok(())
                });
            }

            // Sub-workers hold the remaining senders; the queue closes after the last one.
            drop(output);
            nested.wait().await?;

            if interrupted {
                return Err(nested.token().error());
            }
            Result::Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineConfig;
    use crate::testing::{assert_stage_error, ConcurrencyProbe, InjectedError, NAMES};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;
    use std::time::Duration;

    #[tokio::test]
    async fn test_parallel_map_produces_same_multiset() {
        let token = CancellationToken::new();

        let mut squares = Pipeline::from_iter(&token, 1..=50u64)
            .parallel_map(|_token, n| async move {
                tokio::time::sleep(Duration::from_millis(50 - n)).await;
                anyhow::Ok(n * n)
            })
            .collect()
            .await
            .unwrap();
        squares.sort_unstable();

        assert_eq!(squares, (1..=50u64).map(|n| n * n).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_parallel_map_name_lengths() {
        let token = CancellationToken::new();

        let lengths: BTreeSet<usize> = Pipeline::from_iter(&token, NAMES)
            .parallel_map(|_token, name| async move { anyhow::Ok(name.len()) })
            .collect()
            .await
            .unwrap()
            .into_iter()
            .collect();

        assert_eq!(lengths, BTreeSet::from([3, 4, 5, 7]));
    }

    #[tokio::test]
    async fn test_parallel_filter_keeps_duplicates() {
        let token = CancellationToken::new();

        let mut kept = Pipeline::from_iter(&token, vec![1, 2, 2, 3, 4, 4, 4])
            .parallel_filter(|_token, n: i32| async move { anyhow::Ok(n % 2 == 0) })
            .collect()
            .await
            .unwrap();
        kept.sort_unstable();

        assert_eq!(kept, vec![2, 2, 4, 4, 4]);
    }

    #[tokio::test]
    async fn test_parallel_map_error_cancels_siblings() {
        let token = CancellationToken::new();

        let result = Pipeline::from_iter(&token, 0..20u32)
            .parallel_map(|sub_token, n| async move {
                if n == 7 {
                    return Err(InjectedError("parallel_map").into());
                }
                // Siblings park until the failure cancels them.
                sub_token.cancelled().await;
                anyhow::Ok(n)
            })
            .collect()
            .await;

        assert_stage_error(&result, &InjectedError("parallel_map"));
    }

    #[tokio::test]
    async fn test_parallel_filter_error() {
        let token = CancellationToken::new();

        let result = Pipeline::from_iter(&token, 0..5)
            .parallel_filter(|_token, n: i32| async move {
                if n == 2 {
                    Err(InjectedError("parallel_filter").into())
                } else {
                    anyhow::Ok(true)
                }
            })
            .sink(|_token, _n| async { anyhow::Ok(()) })
            .await;

        assert_stage_error(&result, &InjectedError("parallel_filter"));
    }

    #[tokio::test]
    async fn test_limit_bounds_in_flight_work() {
        let token = CancellationToken::new();
        let probe = ConcurrencyProbe::new();

        let tracked = probe.clone();
        let values = Pipeline::from_iter_with_config(&token, PipelineConfig::new().with_queue_capacity(8), 0..32)
            .parallel_map_limited(3, move |_token, n: i32| {
                let probe = tracked.clone();
                async move {
                    let _guard = probe.enter();
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    anyhow::Ok(n)
                }
            })
            .collect()
            .await
            .unwrap();

        assert_eq!(values.len(), 32);
        assert!(probe.peak() <= 3, "peak concurrency was {}", probe.peak());
        assert!(probe.peak() >= 1);
    }

    #[tokio::test]
    async fn test_config_limit_applies_to_parallel_filter() {
        let token = CancellationToken::new();
        let probe = ConcurrencyProbe::new();
        let config = PipelineConfig::new().with_max_parallelism(1);

        let tracked = probe.clone();
        let kept = Pipeline::from_iter_with_config(&token, config, 0..10)
            .parallel_filter(move |_token, n: i32| {
                let probe = tracked.clone();
                async move {
                    let _guard = probe.enter();
                    tokio::task::yield_now().await;
                    anyhow::Ok(n < 5)
                }
            })
            .collect()
            .await
            .unwrap();

        assert_eq!(probe.peak(), 1);
        // One sub-worker at a time keeps the order.
        assert_eq!(kept, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_zero_limit_is_treated_as_one() {
        let token = CancellationToken::new();

        let values = Pipeline::from_iter(&token, 0..4)
            .parallel_map_limited(0, |_token, n: i32| async move { anyhow::Ok(n + 1) })
            .collect()
            .await
            .unwrap();

        assert_eq!(values, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_external_cancel_stops_fan_out() {
        let token = CancellationToken::new();
        let canceller = token.clone();

        let handle = tokio::spawn(async move {
            Pipeline::from_iter(&token, 0..)
                .parallel_map_limited(4, |sub_token, n: u64| async move {
                    sub_token.cancelled().await;
                    anyhow::Ok(n)
                })
                .collect()
                .await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel("shutdown");

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("pipeline hung after cancellation")
            .unwrap();
        crate::testing::assert_cancelled(&result);
    }
}
