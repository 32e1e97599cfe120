//! Task descriptors handed to research workers.
//!
//! The worker program is fixed and takes no generated code. Everything it needs
//! to know about a request travels in a JSON descriptor file, so free-form user
//! text is always data and never part of an executable template.

use deepdive_core::{HistoryTurn, TaskRequest, WorkerVariant};
use serde::{Deserialize, Serialize};

use crate::error::RunnerError;

const BING_GROUNDING_INSTRUCTIONS: &str = "\
You are a research assistant with web search grounding. Answer the current \
query using up-to-date sources. Keep the conversation context in mind, be \
concise and accurate, and cite every source you rely on.";

const DEEP_RESEARCH_INSTRUCTIONS: &str = "\
You are a deep research assistant holding a multi-turn conversation. \
Remember earlier turns and keep the answer consistent with them. Use the deep \
research tool to investigate the current query thoroughly. Provide recent, \
accurate data with concrete technical detail and cite your sources. Organize \
the answer as a structured research report.";

/// Everything a worker needs to serve one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDescriptor {
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub variant: WorkerVariant,
    pub instructions: String,
    /// Prior turns, oldest first. The current turn is `query`.
    pub history: Vec<HistoryTurn>,
    pub query: String,
}

/// Fixed research instructions for a worker variant.
pub fn instructions_for(variant: WorkerVariant) -> &'static str {
    match variant {
        WorkerVariant::BingGrounding => BING_GROUNDING_INSTRUCTIONS,
        WorkerVariant::DeepResearch => DEEP_RESEARCH_INSTRUCTIONS,
    }
}

/// Build the descriptor for a request.
pub fn build_descriptor(request: &TaskRequest) -> TaskDescriptor {
    TaskDescriptor {
        request_id: request.request_id().to_string(),
        conversation_id: request.conversation_id().map(String::from),
        variant: request.variant(),
        instructions: instructions_for(request.variant()).to_string(),
        history: request.prior_turns().to_vec(),
        query: request.message().to_string(),
    }
}

/// Render a request as descriptor file content.
///
/// Pure: the same request always renders to the same bytes.
pub fn render(request: &TaskRequest) -> Result<String, RunnerError> {
    Ok(serde_json::to_string_pretty(&build_descriptor(request))?)
}
