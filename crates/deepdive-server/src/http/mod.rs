//! HTTP server for DeepDive.
//!
//! Provides endpoints for:
//! - Streaming research (`/v1/research/stream`)
//! - Buffered research (`/v1/research`)
//! - Health check (`/health`)

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

mod handlers;

pub use handlers::{ApiError, ResearchRequest, ResearchResponse};

/// Create the HTTP router.
pub fn create_router(state: Arc<AppState>) -> Router {
    // The browser UI is served from another origin.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/research", post(handlers::research))
        .route("/v1/research/stream", post(handlers::research_stream))
        .route("/health", get(handlers::health_check))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(all(test, unix))]
mod tests {
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    use super::*;
    use crate::config::Config;

    const SUMMARY_WORKER: &str =
        "printf 'AGENT_RESPONSE_START\\nSummary\\nAGENT_RESPONSE_END\\nPROCESSING_TIME:12.3\\n'";

    struct TestServer {
        workers: TempDir,
        tasks: TempDir,
        router: Router,
    }

    impl TestServer {
        fn new(worker_body: &str) -> Self {
            Self::with(worker_body, |_| {})
        }

        /// Workers see `DONE_FILE`, a path in the worker directory they may touch.
        fn with(worker_body: &str, configure: impl FnOnce(&mut Config)) -> Self {
            let workers = tempfile::tempdir().unwrap();
            let tasks = tempfile::tempdir().unwrap();
            let script = workers.path().join("worker.sh");
            std::fs::write(&script, format!("#!/bin/sh\n{}\n", worker_body)).unwrap();

            let mut config = Config::default();
            config.runner.program = "/bin/sh".to_string();
            config.runner.args = vec![script.to_string_lossy().into_owned()];
            config.runner.temp_dir = tasks.path().to_path_buf();
            config.runner.grace = Duration::from_secs(1);
            config.runner.drain_timeout = Duration::from_secs(1);
            config.runner.env = vec![(
                "DONE_FILE".to_string(),
                workers.path().join("done").to_string_lossy().into_owned(),
            )];
            configure(&mut config);

            Self {
                workers,
                router: create_router(AppState::new(&config)),
                tasks,
            }
        }

        fn task_files(&self) -> Vec<PathBuf> {
            task_files(self.tasks.path())
        }

        fn worker_done(&self) -> bool {
            self.workers.path().join("done").exists()
        }

        async fn post(&self, uri: &str, body: impl Into<Body>) -> (StatusCode, String) {
            let request = Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(body.into())
                .unwrap();
            let response = self.router.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = response.into_body().collect().await.unwrap().to_bytes();
            (status, String::from_utf8(bytes.to_vec()).unwrap())
        }
    }

    fn task_files(dir: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect()
    }

    fn sse_events(body: &str) -> Vec<Value> {
        body.lines()
            .filter_map(|line| line.strip_prefix("data: "))
            .map(|data| serde_json::from_str(data).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_health() {
        let server = TestServer::new("exit 0");
        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let response = server.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value, json!({ "status": "ok" }));
    }

    #[tokio::test]
    async fn test_empty_message_rejected() {
        let server = TestServer::new(SUMMARY_WORKER);

        let (status, body) = server
            .post("/v1/research/stream", json!({ "message": "   " }).to_string())
            .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        let value: Value = serde_json::from_str(&body).unwrap();
        assert!(value["error"].as_str().unwrap().contains("message"));
        assert!(value["requestId"].as_str().unwrap().starts_with("req_"));
        assert!(value["timestamp"].is_string());
        assert!(server.task_files().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_json_rejected() {
        let server = TestServer::new(SUMMARY_WORKER);

        let (status, body) = server.post("/v1/research", "{\"message\": ").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        let value: Value = serde_json::from_str(&body).unwrap();
        assert!(value["requestId"].as_str().unwrap().starts_with("req_"));
    }

    #[tokio::test]
    async fn test_buffered_research() {
        let server = TestServer::new(SUMMARY_WORKER);

        let (status, body) = server
            .post(
                "/v1/research",
                json!({
                    "message": "quantum computing",
                    "conversationId": "conv-42",
                    "conversationHistory": [
                        { "role": "user", "content": "quantum computing" }
                    ]
                })
                .to_string(),
            )
            .await;

        assert_eq!(status, StatusCode::OK);
        let response: ResearchResponse = serde_json::from_str(&body).unwrap();
        assert!(response.success);
        assert_eq!(response.response, "Summary");
        assert_eq!(response.duration, Some(12.3));
        assert_eq!(response.citations, None);
        assert_eq!(response.conversation_id.as_deref(), Some("conv-42"));
        assert!(response.request_id.starts_with("req_"));
        assert!(server.task_files().is_empty());
    }

    #[tokio::test]
    async fn test_buffered_failure_reports_error_text() {
        let server = TestServer::new("echo 'no markers here'");

        let (status, body) = server
            .post("/v1/research", json!({ "message": "q" }).to_string())
            .await;

        assert_eq!(status, StatusCode::OK);
        let response: ResearchResponse = serde_json::from_str(&body).unwrap();
        assert!(!response.success);
        assert!(response.response.contains("no markers here"));
    }

    #[tokio::test]
    async fn test_streaming_research() {
        let server = TestServer::new(
            r#"
echo 'PROGRESS_UPDATE:{"stage":"Analysis","progress":60}'
printf 'AGENT_RESPONSE_START\nSummary\nAGENT_RESPONSE_END\nPROCESSING_TIME:12.3\n'
"#,
        );

        let request = Request::builder()
            .method("POST")
            .uri("/v1/research/stream")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({ "message": "quantum computing", "variant": "bingGrounding" }).to_string(),
            ))
            .unwrap();
        let response = server.router.clone().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream"));

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let events = sse_events(&String::from_utf8(bytes.to_vec()).unwrap());

        let types: Vec<&str> = events.iter().map(|e| e["type"].as_str().unwrap()).collect();
        assert_eq!(
            types,
            vec!["progress", "progress", "progress", "progress", "progress", "progress", "result"]
        );
        assert_eq!(events[0]["stage"], "initializing");
        assert_eq!(events[0]["progress"], 5);
        assert_eq!(events[5]["stage"], "Analysis");

        let result = events.last().unwrap();
        assert_eq!(result["response"], "Summary");
        assert_eq!(result["duration"], 12.3);
        assert!(result.get("citations").is_none());

        let request_id = result["requestId"].as_str().unwrap();
        assert!(events.iter().all(|e| e["requestId"] == request_id));
        assert!(server.task_files().is_empty());
    }

    #[tokio::test]
    async fn test_stream_disconnect_stops_worker() {
        let server = TestServer::new("exec sleep 30");

        let request = Request::builder()
            .method("POST")
            .uri("/v1/research/stream")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({ "message": "q" }).to_string()))
            .unwrap();
        let response = server.router.clone().oneshot(request).await.unwrap();

        let mut body = response.into_body();
        // Hang up once the worker is being launched.
        loop {
            let frame = body.frame().await.unwrap().unwrap();
            if let Some(data) = frame.data_ref() {
                if String::from_utf8_lossy(data).contains("launching") {
                    break;
                }
            }
        }
        assert_eq!(server.task_files().len(), 1);
        drop(body);

        let mut cleaned = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if server.task_files().is_empty() {
                cleaned = true;
                break;
            }
        }
        assert!(cleaned, "task file left behind after disconnect");
    }

    #[tokio::test]
    async fn test_detached_stream_outlives_client() {
        let server = TestServer::with(
            &format!("sleep 1\ntouch \"$DONE_FILE\"\n{}", SUMMARY_WORKER),
            |config| config.detach_on_disconnect = true,
        );

        let request = Request::builder()
            .method("POST")
            .uri("/v1/research/stream")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({ "message": "q" }).to_string()))
            .unwrap();
        let response = server.router.clone().oneshot(request).await.unwrap();

        let mut body = response.into_body();
        loop {
            let frame = body.frame().await.unwrap().unwrap();
            if let Some(data) = frame.data_ref() {
                if String::from_utf8_lossy(data).contains("launching") {
                    break;
                }
            }
        }
        drop(body);

        // The worker keeps its task file while it runs on without a client.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!server.worker_done());
        assert_eq!(server.task_files().len(), 1);

        let mut finished = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if server.worker_done() && server.task_files().is_empty() {
                finished = true;
                break;
            }
        }
        assert!(finished, "detached worker did not run to completion");
    }

    #[tokio::test]
    async fn test_detached_buffered_research() {
        let server = TestServer::with(SUMMARY_WORKER, |config| {
            config.detach_on_disconnect = true;
        });

        let (status, body) = server
            .post("/v1/research", json!({ "message": "q" }).to_string())
            .await;

        assert_eq!(status, StatusCode::OK);
        let response: ResearchResponse = serde_json::from_str(&body).unwrap();
        assert!(response.success);
        assert_eq!(response.response, "Summary");
        assert!(server.task_files().is_empty());
    }

    #[tokio::test]
    async fn test_cors_headers() {
        let server = TestServer::new("exit 0");
        let request = Request::builder()
            .uri("/health")
            .header(header::ORIGIN, "http://localhost:5173")
            .body(Body::empty())
            .unwrap();

        let response = server.router.clone().oneshot(request).await.unwrap();
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "*"
        );
    }
}
