//! Per-request worker orchestration.
//!
//! One [`Orchestrator::run`] call owns a request from start to finish:
//!
//! 1. Render the task descriptor
//! 2. Write and verify the task file
//! 3. Spawn the worker
//! 4. Supervise it: relay progress, enforce the deadline, honour cancellation
//! 5. Extract the result from its stdout
//! 6. Emit exactly one terminal event
//! 7. Delete the task file
//!
//! Steps 1 to 3 are announced to the client as lifecycle progress events.

use deepdive_core::{
    ErrorEvent, ProgressEvent, ResultEvent, StreamEvent, TaskRequest, WorkerProcess,
    WorkerStatus,
};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::RunnerConfig;
use crate::descriptor;
use crate::ephemeral::EphemeralFileManager;
use crate::error::RunnerError;
use crate::extract::{self, ExtractedResult};
use crate::launcher::{self, ExitInfo, LaunchSpec, OutputCapture, WorkerHandle};
use crate::relay::ProgressRelay;
use crate::sink::EventSink;
use crate::timeout::{TimeoutAction, TimeoutController};

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// How a request ended.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// The terminal event, also delivered to the sink.
    pub terminal: StreamEvent,
    /// The request's worker record. Pre-spawn failures get a `SpawnFailed`
    /// record with no pid.
    pub worker: WorkerProcess,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.terminal, StreamEvent::Result(_))
    }

    /// Final worker status.
    pub fn status(&self) -> WorkerStatus {
        self.worker.status
    }
}

/// Runs research requests against out-of-process workers.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    config: RunnerConfig,
    files: EphemeralFileManager,
}

impl Orchestrator {
    pub fn new(config: RunnerConfig) -> Self {
        let files = EphemeralFileManager::new(config.temp_dir.clone());
        Self { config, files }
    }

    /// Run one request to completion.
    ///
    /// Every event goes to `sink`, ending with exactly one terminal event.
    /// Errors never escape: they become the terminal [`ErrorEvent`].
    /// Cancelling `cancel` stops the worker (terminate, then kill after the
    /// grace period). Dropping the returned future kills the worker and removes
    /// the task file.
    pub async fn run(
        &self,
        request: TaskRequest,
        sink: &dyn EventSink,
        cancel: CancellationToken,
    ) -> RunOutcome {
        let span = info_span!(
            "research",
            request_id = %request.request_id(),
            variant = %request.variant()
        );
        self.run_request(request, sink, cancel).instrument(span).await
    }

    async fn run_request(
        &self,
        request: TaskRequest,
        sink: &dyn EventSink,
        cancel: CancellationToken,
    ) -> RunOutcome {
        let started = Instant::now();
        info!(
            message_len = request.message().len(),
            history_len = request.history().len(),
            "Research request started"
        );

        let (result, worker) = self.execute(&request, sink, &cancel).await;
        let status = worker.status;
        let elapsed = started.elapsed().as_secs_f64();
        let request_id = request.request_id().clone();

        let terminal: StreamEvent = match result {
            Ok(extracted) => {
                let duration = extracted.duration_seconds.unwrap_or(elapsed);
                info!(
                    status = %status,
                    pid = ?worker.pid,
                    worker_secs = worker.elapsed_seconds(),
                    duration,
                    response_len = extracted.response.len(),
                    "Research request completed"
                );
                ResultEvent::new(
                    request_id,
                    extracted.response,
                    extracted.citations,
                    Some(duration),
                )
                .with_conversation_id(request.conversation_id().map(String::from))
                .into()
            }
            Err(e) => {
                warn!(
                    status = %status,
                    pid = ?worker.pid,
                    error = %e,
                    elapsed,
                    "Research request failed"
                );
                ErrorEvent::new(request_id, e.to_string(), Some(elapsed)).into()
            }
        };

        sink.emit(terminal.clone()).await;
        RunOutcome { terminal, worker }
    }

    async fn execute(
        &self,
        request: &TaskRequest,
        sink: &dyn EventSink,
        cancel: &CancellationToken,
    ) -> (Result<ExtractedResult, RunnerError>, WorkerProcess) {
        let request_id = request.request_id();
        let not_started = || WorkerProcess::spawn_failed(request_id.clone());
        let lifecycle = |stage: &str, progress: u8, details: &str| -> StreamEvent {
            ProgressEvent::new(request_id.clone(), stage, progress, Some(details.to_string()))
                .into()
        };

        sink.emit(lifecycle("initializing", 5, "Preparing research environment"))
            .await;

        sink.emit(lifecycle("preparing", 10, "Building task descriptor"))
            .await;
        let content = match descriptor::render(request) {
            Ok(content) => content,
            Err(e) => return (Err(e), not_started()),
        };

        sink.emit(lifecycle("staging", 15, "Writing task file")).await;
        let script = match self
            .files
            .create(request_id, request.variant(), &content)
            .await
        {
            Ok(script) => script,
            Err(e) => return (Err(e), not_started()),
        };
        if let Err(e) = self.files.verify(script.path()).await {
            script.delete().await;
            return (Err(e), not_started());
        }
        sink.emit(lifecycle("staged", 20, "Task file ready")).await;

        if cancel.is_cancelled() {
            script.delete().await;
            return (Err(RunnerError::Cancelled), not_started());
        }

        sink.emit(lifecycle("launching", 25, "Starting research worker"))
            .await;
        let spec = LaunchSpec {
            program: self.config.program.clone(),
            args: self.config.args.clone(),
            script_path: script.path().to_path_buf(),
            env: self.config.env.clone(),
            working_dir: self.config.working_dir.clone(),
            request_id: request_id.clone(),
            variant: request.variant(),
        };
        // Declared after `script`, so if this future is dropped the worker is
        // killed before its task file is removed.
        let mut handle = match launcher::spawn(&spec) {
            Ok(handle) => handle,
            Err(e) => {
                script.delete().await;
                return (Err(e), not_started());
            }
        };

        let outcome = self.supervise(request, &mut handle, sink, cancel).await;
        drop(handle);
        script.delete().await;
        outcome
    }

    async fn supervise(
        &self,
        request: &TaskRequest,
        handle: &mut WorkerHandle,
        sink: &dyn EventSink,
        cancel: &CancellationToken,
    ) -> (Result<ExtractedResult, RunnerError>, WorkerProcess) {
        let budget = self.config.budget_for(request.variant());
        let mut timeout = TimeoutController::new(budget, self.config.grace);
        let mut relay = ProgressRelay::new(request.request_id().clone());
        let mut capture = OutputCapture::new();

        let mut stdout = handle.take_stdout();
        let mut stderr = handle.take_stderr();
        let mut out_buf = vec![0u8; READ_BUFFER_SIZE];
        let mut err_buf = vec![0u8; READ_BUFFER_SIZE];

        let mut exit: Option<ExitInfo> = None;
        let mut drain_deadline: Option<Instant> = None;
        let mut terminated = false;
        let mut killed = false;
        let mut cancelled = false;

        loop {
            if exit.is_some() && stdout.is_none() && stderr.is_none() {
                break;
            }

            tokio::select! {
                read = read_chunk(&mut stdout, &mut out_buf), if stdout.is_some() => match read {
                    Ok(0) => stdout = None,
                    Ok(n) => {
                        let output = relay.push_chunk(&out_buf[..n]);
                        capture.push_stdout_lines(&output.lines);
                        for event in output.events {
                            sink.emit(event.into()).await;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Error reading worker stdout");
                        stdout = None;
                    }
                },
                read = read_chunk(&mut stderr, &mut err_buf), if stderr.is_some() => match read {
                    Ok(0) => stderr = None,
                    Ok(n) => {
                        for line in capture.push_stderr(&err_buf[..n]) {
                            debug!(stderr = %line, "Worker stderr");
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Error reading worker stderr");
                        stderr = None;
                    }
                },
                status = handle.wait(), if exit.is_none() => {
                    let info = status.unwrap_or_else(|e| {
                        warn!(error = %e, "Failed to wait for worker");
                        ExitInfo { code: None, signal: None }
                    });
                    info!(exit = %info, "Worker exited");
                    timeout.complete();
                    drain_deadline = Some(Instant::now() + self.config.drain_timeout);
                    exit = Some(info);
                },
                action = timeout.next_action(), if exit.is_none() => match action {
                    TimeoutAction::Terminate => {
                        if !cancelled {
                            warn!(budget_secs = budget.as_secs(), "Worker exceeded its deadline, terminating");
                        }
                        handle.terminate();
                        terminated = true;
                    }
                    TimeoutAction::Kill => {
                        warn!(grace_secs = self.config.grace.as_secs(), "Worker still running after grace period, killing");
                        handle.kill();
                        killed = true;
                    }
                },
                _ = cancel.cancelled(), if !cancelled && exit.is_none() => {
                    info!("Request cancelled, stopping worker");
                    cancelled = true;
                    timeout.expire_now();
                },
                _ = sleep_until(drain_deadline.unwrap_or_else(Instant::now)), if drain_deadline.is_some() => {
                    // A grandchild can keep the pipes open after the worker exits.
                    warn!("Worker output still open after exit, abandoning pipes");
                    break;
                },
            }
        }

        let tail = relay.finish();
        capture.push_stdout_lines(&tail.lines);
        for event in tail.events {
            sink.emit(event.into()).await;
        }
        capture.finish_stderr();
        debug!(
            relayed = relay.relayed(),
            dropped = relay.dropped(),
            stdout_bytes = capture.stdout().len(),
            stderr_bytes = capture.stderr().len(),
            "Worker output collected"
        );

        let exit = exit.unwrap_or(ExitInfo {
            code: None,
            signal: None,
        });

        let status = if killed || cancelled {
            WorkerStatus::Killed
        } else if terminated {
            WorkerStatus::TimedOut
        } else {
            WorkerStatus::Completed
        };
        if status == WorkerStatus::Killed && terminated && !cancelled {
            record_status(handle.process_mut(), WorkerStatus::TimedOut);
        }
        record_status(handle.process_mut(), status);
        let worker = handle.process().clone();

        if cancelled {
            return (Err(RunnerError::Cancelled), worker);
        }

        let result = match extract::extract(capture.stdout()) {
            Ok(extracted) => {
                if terminated {
                    info!("Recovered result from timed-out worker");
                }
                Ok(extracted)
            }
            Err(e) if terminated => {
                debug!(error = %e, "No result from timed-out worker");
                Err(RunnerError::Timeout {
                    budget_secs: budget.as_secs(),
                })
            }
            Err(e) => {
                debug!(error = %e, "Worker output did not satisfy the result contract");
                Err(RunnerError::WorkerFailure {
                    status: exit.to_string(),
                    excerpt: capture.failure_excerpt(),
                })
            }
        };
        (result, worker)
    }
}

fn record_status(process: &mut WorkerProcess, status: WorkerStatus) {
    if let Err(e) = process.transition(status) {
        warn!(error = %e, "Unexpected worker status transition");
    }
}

async fn read_chunk<R>(reader: &mut Option<R>, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    match reader.as_mut() {
        Some(reader) => reader.read(buf).await,
        None => std::future::pending().await,
    }
}
