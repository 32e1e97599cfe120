//! Research worker orchestration for DeepDive
//!
//! This crate runs one research request as an external worker process: it
//! writes a JSON task descriptor, launches the worker, relays the worker's
//! `PROGRESS_UPDATE:` lines as events, enforces a deadline and extracts the
//! final answer from the worker's stdout.
//!
//! # Example
//!
//! ```rust,no_run
//! use deepdive_core::{RequestId, TaskRequest, WorkerVariant};
//! use deepdive_runner::{ChannelSink, Orchestrator, RunnerConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! async fn research() -> Result<(), Box<dyn std::error::Error>> {
//!     let orchestrator = Orchestrator::new(RunnerConfig {
//!         args: vec!["worker.py".to_string()],
//!         ..RunnerConfig::default()
//!     });
//!
//!     let request = TaskRequest::new(
//!         RequestId::generate(),
//!         "quantum computing",
//!         None,
//!         vec![],
//!         WorkerVariant::DeepResearch,
//!     )?;
//!
//!     let (sink, mut rx) = ChannelSink::new();
//!     tokio::spawn(async move {
//!         while let Some(event) = rx.recv().await {
//!             println!("{}", event.to_json().unwrap_or_default());
//!         }
//!     });
//!
//!     let outcome = orchestrator.run(request, &sink, CancellationToken::new()).await;
//!     println!("Worker status: {}", outcome.status());
//!     Ok(())
//! }
//! ```

mod config;
mod descriptor;
mod ephemeral;
mod error;
mod extract;
mod launcher;
mod orchestrator;
mod protocol;
mod relay;
mod sink;
mod timeout;

// Re-export main types
pub use config::RunnerConfig;
pub use descriptor::{build_descriptor, render, TaskDescriptor};
pub use ephemeral::{EphemeralFileManager, EphemeralScript};
pub use error::{ProtocolError, RunnerError};
pub use extract::{extract, ExtractedResult};
pub use launcher::{ExitInfo, LaunchSpec, OutputCapture, WorkerHandle};
pub use orchestrator::{Orchestrator, RunOutcome};
pub use relay::{LineBuffer, ProgressRelay, RelayOutput};
pub use sink::{ChannelSink, EventSink, NullSink};
pub use timeout::{TimeoutAction, TimeoutController, TimeoutState};
