//! HTTP handlers for research requests.
//!
//! Two delivery modes share one validation path:
//! - `POST /v1/research/stream` streams progress and the terminal event as SSE
//! - `POST /v1/research` waits for the terminal event and returns it as JSON

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use chrono::{SecondsFormat, Utc};
use deepdive_core::{HistoryTurn, RequestId, StreamEvent, TaskRequest, WorkerVariant};
use deepdive_runner::{ChannelSink, NullSink, RunOutcome};
use futures_util::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::state::AppState;

// ============================================================================
// Request / Response Types
// ============================================================================

/// Request body for both research endpoints.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchRequest {
    /// The query. Required and non-empty.
    #[serde(default)]
    pub message: String,

    #[serde(default)]
    pub conversation_id: Option<String>,

    /// Conversation so far, current turn last.
    #[serde(default)]
    pub conversation_history: Vec<HistoryTurn>,

    #[serde(default)]
    pub variant: WorkerVariant,
}

/// Body returned by `POST /v1/research`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchResponse {
    /// The answer, or the error text when `success` is false.
    pub response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citations: Option<Vec<String>>,
    pub success: bool,
    pub duration: Option<f64>,
    pub request_id: String,
    pub conversation_id: Option<String>,
}

impl ResearchResponse {
    fn from_outcome(outcome: RunOutcome, conversation_id: Option<String>) -> Self {
        match outcome.terminal {
            StreamEvent::Result(result) => Self {
                response: result.response,
                citations: result.citations,
                success: true,
                duration: result.duration_seconds,
                request_id: result.request_id.into_inner(),
                conversation_id,
            },
            StreamEvent::Error(error) => Self {
                response: error.error,
                citations: None,
                success: false,
                duration: error.duration_seconds,
                request_id: error.request_id.into_inner(),
                conversation_id,
            },
            StreamEvent::Progress(progress) => Self {
                response: "Request ended without a result".to_string(),
                citations: None,
                success: false,
                duration: None,
                request_id: progress.request_id.into_inner(),
                conversation_id,
            },
        }
    }
}

/// Error body: `{error, requestId, timestamp}`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error: String,
    request_id: String,
    timestamp: String,
}

// ============================================================================
// API Error Type
// ============================================================================

/// Errors reported before a request reaches the orchestrator.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Body is not valid JSON for a research request.
    #[error("Invalid request body: {message}")]
    InvalidJson {
        request_id: RequestId,
        message: String,
    },

    /// Body parsed but failed validation.
    #[error("{message}")]
    InvalidRequest {
        request_id: RequestId,
        message: String,
    },

    /// The server could not complete the request.
    #[error("{message}")]
    Internal {
        request_id: RequestId,
        message: String,
    },
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &RequestId) {
        match self {
            ApiError::InvalidJson { request_id, .. } => (StatusCode::BAD_REQUEST, request_id),
            ApiError::InvalidRequest { request_id, .. } => (StatusCode::BAD_REQUEST, request_id),
            ApiError::Internal { request_id, .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, request_id)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, request_id) = self.parts();
        let body = ErrorBody {
            error: self.to_string(),
            request_id: request_id.to_string(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        };
        (status, Json(body)).into_response()
    }
}

/// Validate a request body. Nothing is allocated for a rejected request.
fn accept(json_result: Result<Json<ResearchRequest>, JsonRejection>) -> Result<TaskRequest, ApiError> {
    let request_id = RequestId::generate();

    let Json(body) = json_result.map_err(|rejection| {
        warn!(request_id = %request_id, error = %rejection, "Invalid JSON in request body");
        ApiError::InvalidJson {
            request_id: request_id.clone(),
            message: rejection.body_text(),
        }
    })?;

    TaskRequest::new(
        request_id.clone(),
        body.message,
        body.conversation_id,
        body.conversation_history,
        body.variant,
    )
    .map_err(|e| {
        warn!(request_id = %request_id, error = %e, "Rejected research request");
        ApiError::InvalidRequest {
            request_id,
            message: e.to_string(),
        }
    })
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /v1/research/stream - Run a request and stream its events as SSE.
pub async fn research_stream(
    State(state): State<Arc<AppState>>,
    json_result: Result<Json<ResearchRequest>, JsonRejection>,
) -> Response {
    let request = match accept(json_result) {
        Ok(request) => request,
        Err(e) => return e.into_response(),
    };

    info!(
        request_id = %request.request_id(),
        variant = %request.variant(),
        history_len = request.history().len(),
        "Received streaming research request"
    );

    let (sink, rx) = ChannelSink::new();
    tokio::spawn(run_streaming(state, request, sink));

    Sse::new(event_stream(rx))
        .keep_alive(KeepAlive::default())
        .into_response()
}

/// Drive one streaming request, cancelling it if the client goes away.
async fn run_streaming(state: Arc<AppState>, request: TaskRequest, sink: ChannelSink) {
    let request_id = request.request_id().clone();
    let cancel = CancellationToken::new();
    let run = state.orchestrator.run(request, &sink, cancel.clone());
    tokio::pin!(run);

    if state.detach_on_disconnect {
        run.await;
        return;
    }

    tokio::select! {
        _ = &mut run => {}
        _ = sink.closed() => {
            info!(request_id = %request_id, "Client disconnected, stopping research");
            cancel.cancel();
            run.await;
        }
    }
}

/// Turn the event channel into SSE frames, ending after the terminal event.
fn event_stream(
    rx: mpsc::UnboundedReceiver<StreamEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> + Send {
    // State for unfold: (events, terminated)
    let state = (UnboundedReceiverStream::new(rx), false);

    stream::unfold(state, |(mut events, terminated)| async move {
        if terminated {
            return None;
        }
        let event = events.next().await?;
        let is_terminal = event.is_terminal();
        Some((stream_event_to_sse(&event), (events, is_terminal)))
    })
}

/// Convert a StreamEvent to an SSE `data:` frame.
fn stream_event_to_sse(event: &StreamEvent) -> Result<Event, Infallible> {
    match event.to_json() {
        Ok(json) => Ok(Event::default().data(json)),
        Err(e) => {
            error!(request_id = %event.request_id(), error = %e, "Failed to serialize event");
            Ok(Event::default().comment("serialization error"))
        }
    }
}

/// POST /v1/research - Run a request and return its result as one JSON body.
pub async fn research(
    State(state): State<Arc<AppState>>,
    json_result: Result<Json<ResearchRequest>, JsonRejection>,
) -> Response {
    let request = match accept(json_result) {
        Ok(request) => request,
        Err(e) => return e.into_response(),
    };

    let request_id = request.request_id().clone();
    let conversation_id = request.conversation_id().map(String::from);
    info!(
        request_id = %request_id,
        variant = %request.variant(),
        "Received research request"
    );

    // Inline, dropping this future with the connection kills the worker.
    // Detached runs are moved to their own task instead.
    let outcome = if state.detach_on_disconnect {
        let state = state.clone();
        let task = tokio::spawn(async move {
            let sink = NullSink;
            state
                .orchestrator
                .run(request, &sink, CancellationToken::new())
                .await
        });
        match task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(request_id = %request_id, error = %e, "Research task failed");
                return ApiError::Internal {
                    request_id,
                    message: "Research task failed".to_string(),
                }
                .into_response();
            }
        }
    } else {
        let sink = NullSink;
        state
            .orchestrator
            .run(request, &sink, CancellationToken::new())
            .await
    };

    Json(ResearchResponse::from_outcome(outcome, conversation_id)).into_response()
}
