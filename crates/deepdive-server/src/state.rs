//! Shared application state.

use std::sync::Arc;

use deepdive_runner::Orchestrator;

use crate::config::Config;

/// Shared application state.
pub struct AppState {
    /// Runs research requests.
    pub orchestrator: Orchestrator,

    /// Keep workers running after their client disconnects.
    pub detach_on_disconnect: bool,
}

impl AppState {
    /// Create a new AppState wrapped in Arc.
    pub fn new(config: &Config) -> Arc<Self> {
        Arc::new(Self {
            orchestrator: Orchestrator::new(config.runner.clone()),
            detach_on_disconnect: config.detach_on_disconnect,
        })
    }
}
