//! Sequential stages: one worker per stage, arrival order preserved.

use super::handle::Pipeline;
use crate::cancellation::CancellationToken;
use crate::errors::{PipelineError, Result};
use std::future::Future;

impl<T: Send + 'static> Pipeline<T> {
    /// Keeps the values for which `predicate` returns `true`.
    ///
    /// The predicate gets its own clone of each value. A predicate error stops
    /// the stage without forwarding the value and fails the pipeline.
    pub fn filter<F, Fut>(self, mut predicate: F) -> Self
    where
        T: Clone,
        F: FnMut(CancellationToken, T) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        self.chain("filter", move |token, mut input, output| async move {
            while let Some(value) = input.recv(&token).await? {
                let pass = predicate(token.clone(), value.clone())
                    .await
                    .map_err(|e| PipelineError::from_caller(e, &token))?;
                if pass {
                    output.send(value, &token).await?;
                }
            }
            Result::Ok(())
        })
    }

    /// Converts every value with `transform`.
    ///
    /// A transform error stops the stage without forwarding anything for that
    /// value and fails the pipeline.
    pub fn map<O, F, Fut>(self, mut transform: F) -> Pipeline<O>
    where
        O: Send + 'static,
        F: FnMut(CancellationToken, T) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
    {
        self.chain("map", move |token, mut input, output| async move {
            while let Some(value) = input.recv(&token).await? {
                let mapped = transform(token.clone(), value)
                    .await
                    .map_err(|e| PipelineError::from_caller(e, &token))?;
                output.send(mapped, &token).await?;
            }
            Result::Ok(())
        })
    }
}

impl<C> Pipeline<C>
where
    C: IntoIterator + Send + 'static,
    C::Item: Send + 'static,
    C::IntoIter: Send,
{
    /// Forwards every element of every incoming collection, in order.
    pub fn flatten(self) -> Pipeline<C::Item> {
        self.chain("flatten", |token, mut input, output| async move {
            while let Some(batch) = input.recv(&token).await? {
                for value in batch {
                    output.send(value, &token).await?;
                }
            }
            Result::Ok(())
        })
    }
}
