//! Deadline enforcement for worker processes.
//!
//! ```text
//! Running ──budget──▶ TimedOut ──grace──▶ Terminated
//!    │
//!    └──complete()──▶ Completed
//! ```

use std::time::Duration;

use tokio::time::{sleep_until, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutState {
    Running,
    Completed,
    /// Terminate was requested; waiting out the grace period.
    TimedOut,
    /// Kill was requested.
    Terminated,
}

/// What the supervisor should do to the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutAction {
    /// Ask the worker to stop.
    Terminate,
    /// Force the worker to stop.
    Kill,
}

/// Per-request deadline with a terminate-then-kill escalation.
#[derive(Debug)]
pub struct TimeoutController {
    state: TimeoutState,
    deadline: Instant,
    grace: Duration,
    kill_at: Option<Instant>,
}

impl TimeoutController {
    /// Start the clock now.
    pub fn new(budget: Duration, grace: Duration) -> Self {
        Self {
            state: TimeoutState::Running,
            deadline: Instant::now() + budget,
            grace,
            kill_at: None,
        }
    }

    pub fn state(&self) -> TimeoutState {
        self.state
    }

    /// Wait for the next escalation step.
    ///
    /// Cancel-safe: the state only advances once the sleep has completed, so
    /// it can sit in a `select!` loop. Never resolves once the controller is
    /// completed or terminated.
    pub async fn next_action(&mut self) -> TimeoutAction {
        match self.state {
            TimeoutState::Running => {
                sleep_until(self.deadline).await;
                self.state = TimeoutState::TimedOut;
                self.kill_at = Some(Instant::now() + self.grace);
                TimeoutAction::Terminate
            }
            TimeoutState::TimedOut => {
                let kill_at = self.kill_at.unwrap_or_else(Instant::now);
                sleep_until(kill_at).await;
                self.state = TimeoutState::Terminated;
                TimeoutAction::Kill
            }
            TimeoutState::Completed | TimeoutState::Terminated => {
                std::future::pending::<TimeoutAction>().await
            }
        }
    }

    /// The worker finished on its own. Only has an effect while running.
    pub fn complete(&mut self) {
        if self.state == TimeoutState::Running {
            self.state = TimeoutState::Completed;
        }
    }

    /// Move the deadline to now, so the next action is `Terminate`.
    pub fn expire_now(&mut self) {
        if self.state == TimeoutState::Running {
            self.deadline = Instant::now();
        }
    }
}
