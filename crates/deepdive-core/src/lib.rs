//! DeepDive Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - Child processes
//! - HTTP
//! - Runtime specifics
//!
//! All types here describe a research request and the events it produces.

pub mod error;
pub mod event;
pub mod ids;
pub mod request;
pub mod status;
pub mod worker;

// Re-export commonly used types
pub use error::CoreError;
pub use event::{ErrorEvent, ProgressEvent, ResultEvent, StreamEvent};
pub use ids::RequestId;
pub use request::{HistoryTurn, TaskRequest, WorkerVariant};
pub use status::WorkerStatus;
pub use worker::WorkerProcess;
