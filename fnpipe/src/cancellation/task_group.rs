//! Worker group: spawns related tasks and aggregates their first failure.

use super::CancellationToken;
use crate::errors::{PipelineError, Result};
use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn, Instrument};

/// A group of related workers with first-error-wins semantics.
///
/// The first worker to fail has its error latched and the group token
/// cancelled, so every sibling observes cancellation at its next suspension
/// point. [`wait`](Self::wait) joins every worker and returns the latched error.
/// Dropping the group cancels its token.
pub struct WorkerGroup {
    /// Name used in logs and spans.
    name: String,
    /// The cancellation token shared by all workers.
    token: CancellationToken,
    /// Handles to spawned workers.
    handles: Mutex<Vec<JoinHandle<()>>>,
    /// The first error encountered.
    first_error: Arc<Mutex<Option<PipelineError>>>,
}

impl WorkerGroup {
    /// Creates a group whose token is a child of `parent`.
    #[must_use]
    pub fn new(name: impl Into<String>, parent: &CancellationToken) -> Self {
        Self {
            name: name.into(),
            token: parent.child_token(),
            handles: Mutex::new(Vec::new()),
            first_error: Arc::new(Mutex::new(None)),
        }
    }

    /// Returns the group name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the cancellation token.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Spawns a worker in the group.
    ///
    /// The closure receives a clone of the group token. A returned error or a
    /// panic is recorded as the group's failure if it is the first one.
    pub fn spawn<F, Fut>(&self, worker: &str, task: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let reporter = Reporter {
            token: self.token.clone(),
            first_error: self.first_error.clone(),
            worker: worker.to_string(),
        };
        let span = tracing::debug_span!("fnpipe.worker", group = %self.name, worker);
        let future = task(self.token.clone());

        let handle = tokio::spawn(
            async move {
                let result = match AssertUnwindSafe(future).catch_unwind().await {
                    Ok(result) => result,
                    Err(panic) => Err(PipelineError::panicked(
                        &reporter.worker,
                        panic_message(panic.as_ref()),
                    )),
                };
                if let Err(error) = result {
                    reporter.record(error);
                }
            }
            .instrument(span),
        );

        let mut handles = self.handles.lock();
        self.reap_finished(&mut handles);
        handles.push(handle);
    }

    /// Drops handles of workers that already ended, so a long-lived group
    /// only holds the ones still running.
    fn reap_finished(&self, handles: &mut Vec<JoinHandle<()>>) {
        handles.retain_mut(|handle| {
            if !handle.is_finished() {
                return true;
            }
            if let Some(Err(join_error)) = handle.now_or_never() {
                self.fail(
                    "<unknown>",
                    PipelineError::panicked("<unknown>", join_error.to_string()),
                );
            }
            false
        });
    }

    /// Records a failure from a worker that runs outside the group's tasks.
    ///
    /// Terminal stages run on the caller's task and report through here.
    pub fn fail(&self, worker: &str, error: PipelineError) {
        Reporter {
            token: self.token.clone(),
            first_error: self.first_error.clone(),
            worker: worker.to_string(),
        }
        .record(error);
    }

    /// Cancels all workers in the group.
    pub fn cancel_all(&self, reason: &str) {
        self.token.cancel(reason);
    }

    /// Waits for all workers to complete.
    ///
    /// Returns the first error recorded by any worker. The error is handed out
    /// once; later calls return `Ok(())`.
    pub async fn wait(&self) -> Result<()> {
        loop {
            let handles: Vec<_> = std::mem::take(&mut *self.handles.lock());
            if handles.is_empty() {
                break;
            }

            for handle in handles {
                if let Err(join_error) = handle.await {
                    self.fail(
                        "<unknown>",
                        PipelineError::panicked("<unknown>", join_error.to_string()),
                    );
                }
            }
        }

        let first_error = self.first_error.lock().take();
        debug!(group = %self.name, failed = first_error.is_some(), "Worker group finished");

        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Returns the number of workers not yet joined or reaped.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.handles.lock().len()
    }
}

impl Drop for WorkerGroup {
    fn drop(&mut self) {
        self.token.cancel(format!("worker group '{}' dropped", self.name));
    }
}

impl std::fmt::Debug for WorkerGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerGroup")
            .field("name", &self.name)
            .field("task_count", &self.task_count())
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

/// The part of a group a running worker needs to report its failure.
struct Reporter {
    token: CancellationToken,
    first_error: Arc<Mutex<Option<PipelineError>>>,
    worker: String,
}

impl Reporter {
    fn record(&self, error: PipelineError) {
        let mut slot = self.first_error.lock();
        if slot.is_some() {
            debug!(worker = %self.worker, %error, "Worker also failed");
            return;
        }

        if error.is_cancelled() {
            debug!(worker = %self.worker, %error, "Worker cancelled");
        } else {
            warn!(worker = %self.worker, %error, "Worker failed");
        }

        // Latch before cancelling so induced cancellations never win.
        let reason = format!("worker '{}' failed: {}", self.worker, error);
        *slot = Some(error);
        drop(slot);
        self.token.cancel(reason);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
