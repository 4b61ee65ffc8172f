//! Pipeline configuration.

use serde::{Deserialize, Serialize};

/// Configuration shared by every stage of one pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Name used in logs and spans.
    #[serde(default = "default_name")]
    pub name: String,
    /// Capacity of each hand-off queue between stages.
    ///
    /// Values below 1 are treated as 1.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Upper bound on in-flight sub-workers per parallel stage.
    ///
    /// `None` spawns one sub-worker per available input value.
    #[serde(default)]
    pub max_parallelism: Option<usize>,
}

fn default_name() -> String {
    "pipeline".to_string()
}

fn default_queue_capacity() -> usize {
    1
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            queue_capacity: default_queue_capacity(),
            max_parallelism: None,
        }
    }
}

impl PipelineConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Sets the pipeline name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the hand-off queue capacity.
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Bounds the fan-out of parallel stages.
    #[must_use]
    pub fn with_max_parallelism(mut self, limit: usize) -> Self {
        self.max_parallelism = Some(limit);
        self
    }

    /// Returns the queue capacity actually used for channels.
    #[must_use]
    pub fn effective_queue_capacity(&self) -> usize {
        self.queue_capacity.max(1)
    }
}
