//! Worker orchestration settings.

use std::path::PathBuf;
use std::time::Duration;

use deepdive_core::WorkerVariant;

/// How workers are launched and supervised.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Worker executable.
    pub program: String,

    /// Arguments before the task file path, e.g. the worker script.
    pub args: Vec<String>,

    /// Working directory for the worker (inherited when `None`).
    pub working_dir: Option<PathBuf>,

    /// Extra environment variables for the worker.
    pub env: Vec<(String, String)>,

    /// Directory for task files.
    pub temp_dir: PathBuf,

    /// Deadline for `BingGrounding` workers.
    pub bing_timeout: Duration,

    /// Deadline for `DeepResearch` workers.
    pub deep_research_timeout: Duration,

    /// Time between the terminate request and the forced kill.
    pub grace: Duration,

    /// How long to keep reading pipes after the worker exits.
    pub drain_timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
            temp_dir: std::env::temp_dir(),
            bing_timeout: Duration::from_secs(120),
            deep_research_timeout: Duration::from_secs(600),
            grace: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(2),
        }
    }
}

impl RunnerConfig {
    /// Deadline for a worker variant.
    pub fn budget_for(&self, variant: WorkerVariant) -> Duration {
        match variant {
            WorkerVariant::BingGrounding => self.bing_timeout,
            WorkerVariant::DeepResearch => self.deep_research_timeout,
        }
    }
}
