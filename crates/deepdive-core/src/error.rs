//! Core domain errors.

use thiserror::Error;

/// Core domain errors for DeepDive.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A request field failed validation (for example an empty message).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invalid worker status transition.
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}
