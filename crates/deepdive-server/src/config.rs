//! Server configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use deepdive_core::WorkerVariant;
use deepdive_runner::RunnerConfig;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP bind address.
    pub bind_addr: String,

    /// Keep workers running after their client disconnects.
    pub detach_on_disconnect: bool,

    /// Worker launch and supervision settings.
    pub runner: RunnerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3000".to_string(),
            detach_on_disconnect: false,
            runner: RunnerConfig::default(),
        }
    }
}

/// Worker flags shared by `serve` and `run`.
#[derive(Args, Debug, Clone)]
pub struct WorkerArgs {
    /// Worker executable
    #[arg(long, env = "DEEPDIVE_WORKER_PROGRAM", default_value = "python3")]
    pub worker_program: String,

    /// Argument placed before the task file path (repeatable)
    #[arg(long = "worker-arg", env = "DEEPDIVE_WORKER_ARGS", value_delimiter = ',')]
    pub worker_args: Vec<String>,

    /// Working directory for the worker
    #[arg(long, env = "DEEPDIVE_WORKER_DIR")]
    pub worker_dir: Option<PathBuf>,

    /// Extra worker environment variable as KEY=VALUE (repeatable)
    #[arg(
        long = "worker-env",
        env = "DEEPDIVE_WORKER_ENV",
        value_delimiter = ',',
        value_parser = parse_env_pair
    )]
    pub worker_env: Vec<(String, String)>,

    /// Directory for task files [default: system temp dir]
    #[arg(long, env = "DEEPDIVE_TEMP_DIR")]
    pub temp_dir: Option<PathBuf>,

    /// Deadline for bing grounding workers, in seconds
    #[arg(long, env = "DEEPDIVE_BING_TIMEOUT_SECS", default_value = "120")]
    pub bing_timeout_secs: u64,

    /// Deadline for deep research workers, in seconds
    #[arg(long, env = "DEEPDIVE_DEEP_RESEARCH_TIMEOUT_SECS", default_value = "600")]
    pub deep_research_timeout_secs: u64,

    /// Seconds between terminate and kill
    #[arg(long, env = "DEEPDIVE_GRACE_SECS", default_value = "5")]
    pub grace_secs: u64,
}

impl WorkerArgs {
    pub fn runner_config(&self) -> RunnerConfig {
        let defaults = RunnerConfig::default();
        RunnerConfig {
            program: self.worker_program.clone(),
            args: self.worker_args.clone(),
            working_dir: self.worker_dir.clone(),
            env: self.worker_env.clone(),
            temp_dir: self.temp_dir.clone().unwrap_or(defaults.temp_dir),
            bing_timeout: Duration::from_secs(self.bing_timeout_secs),
            deep_research_timeout: Duration::from_secs(self.deep_research_timeout_secs),
            grace: Duration::from_secs(self.grace_secs),
            drain_timeout: defaults.drain_timeout,
        }
    }
}

/// Parse a `KEY=VALUE` pair.
pub fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))?;
    if key.is_empty() {
        return Err(format!("empty variable name in '{}'", raw));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Parse a worker variant name (`bing-grounding`, `deep_research`, `deepResearch`, ...).
pub fn parse_variant(raw: &str) -> Result<WorkerVariant, String> {
    let normalized: String = raw
        .chars()
        .filter(|c| *c != '-' && *c != '_')
        .flat_map(char::to_lowercase)
        .collect();
    match normalized.as_str() {
        "binggrounding" | "bing" => Ok(WorkerVariant::BingGrounding),
        "deepresearch" | "deep" => Ok(WorkerVariant::DeepResearch),
        _ => Err(format!(
            "unknown variant '{}', expected bing-grounding or deep-research",
            raw
        )),
    }
}
