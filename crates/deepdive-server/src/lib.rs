//! DeepDive Server Library
//!
//! This crate provides the HTTP front end for DeepDive: research requests
//! arrive over HTTP, run as worker processes through `deepdive-runner`, and
//! their progress is streamed back as server-sent events.

pub mod config;
pub mod http;
pub mod state;

pub use config::{Config, WorkerArgs};
pub use state::AppState;
