//! Status enums for worker processes.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a worker process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerStatus {
    /// Worker process is executing.
    #[default]
    Running,
    /// Worker exited on its own.
    Completed,
    /// Deadline elapsed and the worker exited after the terminate signal.
    TimedOut,
    /// Worker was forcibly killed (grace expired or the request was cancelled).
    Killed,
    /// The worker executable could not be started.
    SpawnFailed,
}

impl WorkerStatus {
    /// Returns true if the worker is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }

    /// Returns true if moving from `self` to `next` is a legal transition.
    ///
    /// A timed-out worker may still be escalated to `Killed`; every other
    /// terminal status is final.
    pub fn can_transition_to(&self, next: WorkerStatus) -> bool {
        match (self, next) {
            (Self::Running, Self::Running) => false,
            (Self::Running, _) => true,
            (Self::TimedOut, Self::Killed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::TimedOut => write!(f, "timed_out"),
            Self::Killed => write!(f, "killed"),
            Self::SpawnFailed => write!(f, "spawn_failed"),
        }
    }
}
