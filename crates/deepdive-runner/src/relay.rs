//! Incremental progress relay over worker stdout.

use deepdive_core::{ProgressEvent, RequestId};
use tracing::{debug, warn};

use crate::protocol;

/// Splits a byte stream into lines, carrying partial lines across chunks.
///
/// Lines are decoded lossily, so invalid UTF-8 never stops the stream. A
/// multi-byte character split between chunks is decoded once its line
/// completes.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed, without terminators.
    ///
    /// Only the new chunk is searched for terminators, so a long line costs
    /// linear time however many chunks it arrives in.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = chunk;
        while let Some(pos) = rest.iter().position(|b| *b == b'\n') {
            self.pending.extend_from_slice(&rest[..pos]);
            lines.push(self.take_line());
            rest = &rest[pos + 1..];
        }
        self.pending.extend_from_slice(rest);
        lines
    }

    /// Flush a trailing line that was never terminated.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&raw).into_owned())
    }

    fn take_line(&mut self) -> String {
        let mut line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        if line.ends_with('\r') {
            line.pop();
        }
        line
    }
}

/// Lines completed by a chunk and the progress events found in them.
#[derive(Debug, Default)]
pub struct RelayOutput {
    pub lines: Vec<String>,
    pub events: Vec<ProgressEvent>,
}

/// Turns `PROGRESS_UPDATE:` markers into [`ProgressEvent`]s as stdout arrives.
///
/// Events come out in the order their markers appear. A malformed payload is
/// logged and skipped; it never affects the lines around it.
#[derive(Debug)]
pub struct ProgressRelay {
    request_id: RequestId,
    lines: LineBuffer,
    relayed: u64,
    dropped: u64,
}

impl ProgressRelay {
    pub fn new(request_id: RequestId) -> Self {
        Self {
            request_id,
            lines: LineBuffer::new(),
            relayed: 0,
            dropped: 0,
        }
    }

    /// Consume one stdout chunk.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> RelayOutput {
        let lines = self.lines.push(chunk);
        self.scan(lines)
    }

    /// Flush the trailing partial line at end of stream.
    pub fn finish(&mut self) -> RelayOutput {
        let lines = self.lines.finish().into_iter().collect();
        self.scan(lines)
    }

    /// Number of progress events relayed so far.
    pub fn relayed(&self) -> u64 {
        self.relayed
    }

    /// Number of malformed payloads dropped so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn scan(&mut self, lines: Vec<String>) -> RelayOutput {
        let mut events = Vec::new();
        for line in &lines {
            match protocol::parse_progress_line(line) {
                None => {}
                Some(Ok(payload)) => {
                    self.relayed += 1;
                    debug!(
                        request_id = %self.request_id,
                        stage = %payload.stage,
                        progress = payload.percent(),
                        "Relaying worker progress"
                    );
                    events.push(ProgressEvent::new(
                        self.request_id.clone(),
                        payload.stage.clone(),
                        payload.percent(),
                        payload.details(),
                    ));
                }
                Some(Err(e)) => {
                    self.dropped += 1;
                    let preview: String = line.chars().take(200).collect();
                    warn!(
                        request_id = %self.request_id,
                        error = %e,
                        preview = %preview,
                        "Dropping malformed progress update"
                    );
                }
            }
        }
        RelayOutput { lines, events }
    }
}
