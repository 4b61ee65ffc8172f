//! The pipeline handle and the execution scope it carries.

use super::config::PipelineConfig;
use super::queue::{handoff, HandoffReceiver, HandoffSender};
use crate::cancellation::{CancellationToken, WorkerGroup};
use crate::errors::{PipelineError, Result};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// The execution scope shared by every stage of one pipeline instance.
///
/// Holds the pipeline's cancellation token and worker group. Each stage
/// constructor takes the scope from its input handle and hands the same scope
/// to its output handle. Dropping the last clone cancels the token.
#[derive(Clone)]
pub struct PipelineScope {
    group: Arc<WorkerGroup>,
    config: Arc<PipelineConfig>,
    run_id: Uuid,
    stages: Arc<AtomicUsize>,
}

impl PipelineScope {
    pub(crate) fn new(parent: &CancellationToken, config: PipelineConfig) -> Self {
        let run_id = Uuid::now_v7();
        debug!(pipeline = %config.name, %run_id, "Pipeline scope created");

        Self {
            group: Arc::new(WorkerGroup::new(config.name.clone(), parent)),
            config: Arc::new(config),
            run_id,
            stages: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Returns the pipeline's cancellation token.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        self.group.token()
    }

    /// Returns the pipeline configuration.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Returns the identifier of this pipeline run.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Cancels every worker of the pipeline.
    pub fn cancel(&self, reason: &str) {
        self.group.cancel_all(reason);
    }

    /// Names the next stage worker, e.g. `map[2]`.
    pub(crate) fn worker_name(&self, stage: &str) -> String {
        format!("{stage}[{}]", self.stages.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn spawn<F, Fut>(&self, worker: &str, task: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.group.spawn(worker, task);
    }

    /// Reports a terminal worker's outcome and joins the whole pipeline.
    pub(crate) async fn finish(&self, worker: &str, outcome: Result<()>) -> Result<()> {
        if let Err(error) = outcome {
            self.group.fail(worker, error);
        }
        self.group.wait().await
    }

    /// Like [`finish`](Self::finish) for a failed terminal worker; always yields an error.
    pub(crate) async fn finish_failed(&self, worker: &str, error: PipelineError) -> PipelineError {
        match self.finish(worker, Err(error)).await {
            Err(first) => first,
            Ok(()) => self.token().error(),
        }
    }
}

impl std::fmt::Debug for PipelineScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineScope")
            .field("name", &self.config.name)
            .field("run_id", &self.run_id)
            .field("group", &self.group)
            .finish()
    }
}

/// The live tail of a pipeline producing values of type `T`.
///
/// Every stage method consumes the handle and returns a new one reading the
/// stage's output. Terminal stages ([`sink`], [`reduce`], [`collect`]) join the
/// pipeline and report its outcome.
///
/// [`sink`]: Pipeline::sink
/// [`reduce`]: Pipeline::reduce
/// [`collect`]: Pipeline::collect
#[must_use = "a pipeline only reports its outcome through a terminal stage"]
pub struct Pipeline<T> {
    pub(crate) scope: PipelineScope,
    pub(crate) values: HandoffReceiver<T>,
}

impl<T> Pipeline<T> {
    /// Returns the execution scope.
    pub fn scope(&self) -> &PipelineScope {
        &self.scope
    }

    /// Returns the pipeline's cancellation token.
    pub fn token(&self) -> &CancellationToken {
        self.scope.token()
    }

    /// Wires a new stage onto the pipeline.
    ///
    /// Spawns `worker` in the scope's group with this handle's queue as input
    /// and a fresh queue as output, and returns the handle reading that output.
    pub(crate) fn chain<O, F, Fut>(self, stage: &str, worker: F) -> Pipeline<O>
    where
        F: FnOnce(CancellationToken, HandoffReceiver<T>, HandoffSender<O>) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let Self { scope, values } = self;
        let (tx, rx) = handoff(scope.config().effective_queue_capacity());
        let name = scope.worker_name(stage);

        scope.spawn(&name, move |token| worker(token, values, tx));

        Pipeline { scope, values: rx }
    }
}

impl<T> std::fmt::Debug for Pipeline<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("scope", &self.scope)
            .field("values", &self.values)
            .finish()
    }
}
