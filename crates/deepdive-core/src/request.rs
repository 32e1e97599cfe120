//! Research request types.

use crate::{CoreError, RequestId};
use serde::{Deserialize, Serialize};

/// Worker capability selected for a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WorkerVariant {
    /// Lightweight web-grounded answer.
    BingGrounding,
    /// Long-running deep research report.
    #[default]
    DeepResearch,
}

impl WorkerVariant {
    /// Stable lowercase label, used in file names and worker environment.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BingGrounding => "bing_grounding",
            Self::DeepResearch => "deep_research",
        }
    }
}

impl std::fmt::Display for WorkerVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A prior turn of the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryTurn {
    /// Speaker role ("user", "assistant", ...).
    pub role: String,

    /// Free-form message text.
    pub content: String,

    /// Client-side timestamp, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl HistoryTurn {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            timestamp: None,
        }
    }
}

/// A validated research request. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRequest {
    request_id: RequestId,
    message: String,
    conversation_id: Option<String>,
    history: Vec<HistoryTurn>,
    variant: WorkerVariant,
}

impl TaskRequest {
    /// Build a request, rejecting an empty message.
    pub fn new(
        request_id: RequestId,
        message: impl Into<String>,
        conversation_id: Option<String>,
        history: Vec<HistoryTurn>,
        variant: WorkerVariant,
    ) -> Result<Self, CoreError> {
        let message = message.into();
        if message.trim().is_empty() {
            return Err(CoreError::InvalidInput(
                "message must not be empty".to_string(),
            ));
        }
        Ok(Self {
            request_id,
            message,
            conversation_id,
            history,
            variant,
        })
    }

    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// The current query.
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    /// Full history as supplied by the client, current turn included.
    pub fn history(&self) -> &[HistoryTurn] {
        &self.history
    }

    /// History to replay to the worker: every turn except the final one,
    /// which the client sends as the current message.
    pub fn prior_turns(&self) -> &[HistoryTurn] {
        match self.history.split_last() {
            Some((_, prior)) => prior,
            None => &[],
        }
    }

    pub fn variant(&self) -> WorkerVariant {
        self.variant
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(message: &str, history: Vec<HistoryTurn>) -> Result<TaskRequest, CoreError> {
        TaskRequest::new(
            RequestId::generate(),
            message,
            Some("conv-1".to_string()),
            history,
            WorkerVariant::DeepResearch,
        )
    }

    #[test]
    fn test_empty_message_rejected() {
        assert!(matches!(request("", vec![]), Err(CoreError::InvalidInput(_))));
        assert!(matches!(
            request("   \n", vec![]),
            Err(CoreError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_prior_turns_exclude_final_turn() {
        let req = request(
            "and now?",
            vec![
                HistoryTurn::new("user", "first"),
                HistoryTurn::new("assistant", "answer"),
                HistoryTurn::new("user", "and now?"),
            ],
        )
        .unwrap();

        let prior = req.prior_turns();
        assert_eq!(prior.len(), 2);
        assert_eq!(prior[1].content, "answer");
    }

    #[test]
    fn test_prior_turns_empty_history() {
        let req = request("quantum computing", vec![]).unwrap();
        assert!(req.prior_turns().is_empty());
    }

    #[test]
    fn test_variant_serialization() {
        assert_eq!(
            serde_json::to_string(&WorkerVariant::BingGrounding).unwrap(),
            r#""bingGrounding""#
        );
        let v: WorkerVariant = serde_json::from_str(r#""deepResearch""#).unwrap();
        assert_eq!(v, WorkerVariant::DeepResearch);
    }
}
