//! Worker process record.

use crate::{CoreError, RequestId, WorkerStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One worker process, owned by the orchestrator for a single request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerProcess {
    /// OS process id (absent if the spawn failed or the OS did not report one).
    pub pid: Option<u32>,

    /// Request this worker serves.
    pub request_id: RequestId,

    /// When the process was started.
    pub started_at: DateTime<Utc>,

    /// Current lifecycle status.
    pub status: WorkerStatus,
}

impl WorkerProcess {
    /// Record a freshly spawned worker.
    pub fn running(pid: Option<u32>, request_id: RequestId) -> Self {
        Self {
            pid,
            request_id,
            started_at: Utc::now(),
            status: WorkerStatus::Running,
        }
    }

    /// Record a worker that never started.
    pub fn spawn_failed(request_id: RequestId) -> Self {
        Self {
            pid: None,
            request_id,
            started_at: Utc::now(),
            status: WorkerStatus::SpawnFailed,
        }
    }

    /// Move to a new status, rejecting illegal transitions.
    pub fn transition(&mut self, next: WorkerStatus) -> Result<(), CoreError> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::InvalidStateTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    /// Seconds elapsed since the worker started.
    pub fn elapsed_seconds(&self) -> f64 {
        (Utc::now() - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}
