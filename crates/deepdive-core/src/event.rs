//! Events delivered to the caller while a request runs.

use crate::{CoreError, RequestId};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Incremental progress report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub request_id: RequestId,
    /// Human-readable stage label.
    pub stage: String,
    /// Percentage in 0..=100.
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub timestamp: String,
}

impl ProgressEvent {
    /// Create a progress event stamped with the current time.
    ///
    /// `progress` is clamped to 100.
    pub fn new(
        request_id: RequestId,
        stage: impl Into<String>,
        progress: u8,
        details: Option<String>,
    ) -> Self {
        Self {
            request_id,
            stage: stage.into(),
            progress: progress.min(100),
            details,
            timestamp: now_rfc3339(),
        }
    }
}

/// Final answer for a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultEvent {
    pub request_id: RequestId,
    pub response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citations: Option<Vec<String>>,
    #[serde(
        default,
        rename = "duration",
        skip_serializing_if = "Option::is_none"
    )]
    pub duration_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub timestamp: String,
}

impl ResultEvent {
    pub fn new(
        request_id: RequestId,
        response: impl Into<String>,
        citations: Option<Vec<String>>,
        duration_seconds: Option<f64>,
    ) -> Self {
        Self {
            request_id,
            response: response.into(),
            citations,
            duration_seconds,
            conversation_id: None,
            timestamp: now_rfc3339(),
        }
    }

    /// Builder method to echo the caller's conversation id.
    pub fn with_conversation_id(mut self, conversation_id: Option<String>) -> Self {
        self.conversation_id = conversation_id;
        self
    }
}

/// Terminal failure for a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEvent {
    pub request_id: RequestId,
    pub error: String,
    #[serde(
        default,
        rename = "duration",
        skip_serializing_if = "Option::is_none"
    )]
    pub duration_seconds: Option<f64>,
    pub timestamp: String,
}

impl ErrorEvent {
    pub fn new(
        request_id: RequestId,
        error: impl Into<String>,
        duration_seconds: Option<f64>,
    ) -> Self {
        Self {
            request_id,
            error: error.into(),
            duration_seconds,
            timestamp: now_rfc3339(),
        }
    }
}

/// One event on a request's stream.
///
/// Serialized with a `"type"` tag: `progress`, `result` or `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Progress(ProgressEvent),
    Result(ResultEvent),
    Error(ErrorEvent),
}

impl StreamEvent {
    /// Result and Error events end the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Result(_) | Self::Error(_))
    }

    pub fn request_id(&self) -> &RequestId {
        match self {
            Self::Progress(e) => &e.request_id,
            Self::Result(e) => &e.request_id,
            Self::Error(e) => &e.request_id,
        }
    }

    /// Serialize to a single JSON line.
    pub fn to_json(&self) -> Result<String, CoreError> {
        serde_json::to_string(self).map_err(|e| CoreError::Serialization(e.to_string()))
    }
}

impl From<ProgressEvent> for StreamEvent {
    fn from(event: ProgressEvent) -> Self {
        Self::Progress(event)
    }
}

impl From<ResultEvent> for StreamEvent {
    fn from(event: ResultEvent) -> Self {
        Self::Result(event)
    }
}

impl From<ErrorEvent> for StreamEvent {
    fn from(event: ErrorEvent) -> Self {
        Self::Error(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_progress_wire_shape() {
        let event: StreamEvent =
            ProgressEvent::new(RequestId::new("req_1_a"), "analysis", 40, None).into();
        let value: Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();

        assert_eq!(value["type"], "progress");
        assert_eq!(value["requestId"], "req_1_a");
        assert_eq!(value["stage"], "analysis");
        assert_eq!(value["progress"], 40);
        assert!(value.get("details").is_none());
        assert!(chrono::DateTime::parse_from_rfc3339(value["timestamp"].as_str().unwrap()).is_ok());
    }

    #[test]
    fn test_result_omits_absent_citations() {
        let event: StreamEvent =
            ResultEvent::new(RequestId::new("req_1_a"), "Summary", None, Some(12.3)).into();
        let value: Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();

        assert_eq!(value["type"], "result");
        assert_eq!(value["response"], "Summary");
        assert_eq!(value["duration"], 12.3);
        assert!(value.get("citations").is_none());
        assert!(event.is_terminal());
    }

    #[test]
    fn test_error_event_roundtrip() {
        let event: StreamEvent =
            ErrorEvent::new(RequestId::new("req_1_a"), "worker timed out", Some(5.0)).into();
        let parsed: StreamEvent = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(parsed, event);
        assert!(parsed.is_terminal());
    }

    #[test]
    fn test_progress_clamped() {
        let event = ProgressEvent::new(RequestId::new("req_1_a"), "done", 250, None);
        assert_eq!(event.progress, 100);
    }
}
