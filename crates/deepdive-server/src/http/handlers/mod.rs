//! HTTP request handlers.

mod health;
mod research;

pub use health::health_check;
pub use research::{research, research_stream, ApiError, ResearchRequest, ResearchResponse};
