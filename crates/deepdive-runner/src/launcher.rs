//! Worker process launching and control.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;

use deepdive_core::{RequestId, WorkerProcess, WorkerVariant};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::{debug, info, warn};

use crate::error::RunnerError;
use crate::extract;
use crate::relay::LineBuffer;

/// Environment variable carrying the request id.
pub const ENV_REQUEST_ID: &str = "DEEPDIVE_REQUEST_ID";
/// Environment variable carrying the task file path.
pub const ENV_TASK_FILE: &str = "DEEPDIVE_TASK_FILE";
/// Environment variable carrying the worker variant label.
pub const ENV_VARIANT: &str = "DEEPDIVE_VARIANT";

/// Maximum characters of worker output quoted in a failure message.
pub const EXCERPT_CHARS: usize = 500;

/// How to start one worker.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Executable, resolved through `PATH` when not absolute.
    pub program: String,
    /// Arguments placed before the task file path.
    pub args: Vec<String>,
    /// Task file, passed as the final argument.
    pub script_path: PathBuf,
    /// Extra variables on top of the inherited environment.
    pub env: Vec<(String, String)>,
    pub working_dir: Option<PathBuf>,
    pub request_id: RequestId,
    pub variant: WorkerVariant,
}

impl LaunchSpec {
    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).arg(&self.script_path);

        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd.env(ENV_REQUEST_ID, self.request_id.as_str())
            .env(ENV_TASK_FILE, &self.script_path)
            .env(ENV_VARIANT, self.variant.as_str());

        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

/// Start a worker.
pub fn spawn(spec: &LaunchSpec) -> Result<WorkerHandle, RunnerError> {
    let mut cmd = spec.command();
    debug!(command = ?cmd, "Worker command");

    let mut child = cmd.spawn().map_err(|source| {
        warn!(program = %spec.program, error = %source, "Failed to spawn worker");
        RunnerError::Spawn {
            program: spec.program.clone(),
            source,
        }
    })?;

    let process = WorkerProcess::running(child.id(), spec.request_id.clone());
    info!(
        request_id = %spec.request_id,
        pid = ?process.pid,
        program = %spec.program,
        "Worker spawned"
    );

    Ok(WorkerHandle {
        stdout: child.stdout.take(),
        stderr: child.stderr.take(),
        child,
        process,
    })
}

/// How a worker process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    pub code: Option<i32>,
    /// Terminating signal, on unix.
    pub signal: Option<i32>,
}

impl ExitInfo {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<std::process::ExitStatus> for ExitInfo {
    fn from(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

impl fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(signal)) => write!(f, "killed by signal {}", signal),
            (None, None) => write!(f, "unknown exit status"),
        }
    }
}

/// A running worker owned by one request.
///
/// Dropping the handle kills the process.
#[derive(Debug)]
pub struct WorkerHandle {
    child: Child,
    process: WorkerProcess,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
}

impl WorkerHandle {
    pub fn process(&self) -> &WorkerProcess {
        &self.process
    }

    pub fn process_mut(&mut self) -> &mut WorkerProcess {
        &mut self.process
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.stderr.take()
    }

    /// Ask the worker to stop (SIGTERM on unix, a forced kill elsewhere).
    pub fn terminate(&mut self) {
        #[cfg(unix)]
        if let Some(pid) = self.child.id() {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                Ok(()) => debug!(pid, "Sent SIGTERM to worker"),
                Err(e) => warn!(pid, error = %e, "Failed to send SIGTERM to worker"),
            }
            return;
        }
        self.kill();
    }

    /// Kill the worker without waiting for it.
    pub fn kill(&mut self) {
        if let Err(e) = self.child.start_kill() {
            // Already reaped is the usual cause.
            debug!(error = %e, "Failed to kill worker");
        }
    }

    /// Wait for the worker to exit.
    pub async fn wait(&mut self) -> std::io::Result<ExitInfo> {
        self.child.wait().await.map(ExitInfo::from)
    }
}

/// Append-only record of everything a worker printed.
#[derive(Debug, Default)]
pub struct OutputCapture {
    stdout: String,
    stderr: String,
    stderr_lines: LineBuffer,
}

impl OutputCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append completed stdout lines.
    pub fn push_stdout_lines(&mut self, lines: &[String]) {
        for line in lines {
            self.stdout.push_str(line);
            self.stdout.push('\n');
        }
    }

    /// Append a raw stderr chunk and return the lines it completed.
    pub fn push_stderr(&mut self, chunk: &[u8]) -> Vec<String> {
        let lines = self.stderr_lines.push(chunk);
        for line in &lines {
            self.stderr.push_str(line);
            self.stderr.push('\n');
        }
        lines
    }

    /// Flush an unterminated trailing stderr line.
    pub fn finish_stderr(&mut self) {
        if let Some(line) = self.stderr_lines.finish() {
            self.stderr.push_str(&line);
            self.stderr.push('\n');
        }
    }

    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    /// Short quote of the output for failure messages.
    ///
    /// The head of stderr when there is any, otherwise the tail of stdout.
    pub fn failure_excerpt(&self) -> String {
        if !self.stderr.trim().is_empty() {
            extract::excerpt(&self.stderr, EXCERPT_CHARS)
        } else if !self.stdout.trim().is_empty() {
            extract::tail_excerpt(&self.stdout, EXCERPT_CHARS)
        } else {
            "worker produced no output".to_string()
        }
    }
}
