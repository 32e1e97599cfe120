//! Error types for worker orchestration.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while running a research worker.
///
/// None of these escape [`Orchestrator::run`](crate::Orchestrator::run); each
/// is turned into the request's terminal error event.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The task file could not be written.
    #[error("Failed to write task file '{path}': {source}")]
    ScriptWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The task file was written but could not be found afterwards.
    #[error("Task file '{path}' could not be verified: {source}")]
    FileVerification {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The worker executable could not be started.
    #[error("Failed to start worker '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The worker exceeded its deadline and produced no usable result.
    #[error("Worker exceeded its {budget_secs}s deadline and was terminated")]
    Timeout { budget_secs: u64 },

    /// The worker exited without satisfying the result-marker contract.
    #[error("Worker failed ({status}): {excerpt}")]
    WorkerFailure { status: String, excerpt: String },

    /// The request was cancelled before the worker finished.
    #[error("Request cancelled; worker terminated")]
    Cancelled,

    /// The task descriptor could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by the stdout marker protocol.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// No `AGENT_RESPONSE_START` / `AGENT_RESPONSE_END` pair in the output.
    #[error("No result markers found in worker output")]
    NoResultMarker,

    /// A progress payload could not be decoded. Recovered locally.
    #[error("Malformed progress payload: {0}")]
    MalformedProgress(#[from] serde_json::Error),
}
