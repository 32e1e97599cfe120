//! Extraction of the final result from a worker's complete stdout.

use crate::error::ProtocolError;
use crate::protocol::{
    self, CITATIONS_END, CITATIONS_START, RESPONSE_END, RESPONSE_START,
};

/// Structured result pulled out of worker output.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedResult {
    /// Response body, trimmed.
    pub response: String,
    /// Citation lines, if the worker printed a citation block.
    pub citations: Option<Vec<String>>,
    /// Worker-measured processing time in seconds.
    pub duration_seconds: Option<f64>,
}

/// Extract the response, citations and processing time from `stdout`.
///
/// The response is the text between the first line ending in
/// `AGENT_RESPONSE_START` and the first line after it that starts with
/// `AGENT_RESPONSE_END`.
/// Citations and processing time are optional and found independently.
pub fn extract(stdout: &str) -> Result<ExtractedResult, ProtocolError> {
    let lines: Vec<&str> = stdout.lines().collect();

    let response = block(&lines, RESPONSE_START, RESPONSE_END)
        .map(|body| body.join("\n").trim().to_string())
        .ok_or(ProtocolError::NoResultMarker)?;

    let citations = block(&lines, CITATIONS_START, CITATIONS_END).map(|body| {
        body.iter()
            .map(|line| line.trim())
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect::<Vec<_>>()
    });

    let duration_seconds = lines
        .iter()
        .find_map(|line| protocol::parse_processing_time(line));

    Ok(ExtractedResult {
        response,
        citations,
        duration_seconds,
    })
}

/// Lines strictly between the first line opened by `start` and the first
/// line after it closed by `end`.
fn block<'a>(lines: &[&'a str], start: &str, end: &str) -> Option<Vec<&'a str>> {
    let open = lines
        .iter()
        .position(|line| protocol::opens_block(line, start))?;
    let close = lines[open + 1..]
        .iter()
        .position(|line| protocol::closes_block(line, end))?;
    Some(lines[open + 1..open + 1 + close].to_vec())
}

/// Truncate `text` to at most `max_chars` characters.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

/// The last `max_chars` characters of `text`.
pub fn tail_excerpt(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    let count = trimmed.chars().count();
    if count <= max_chars {
        return trimmed.to_string();
    }
    let skip = count - max_chars;
    let start = trimmed
        .char_indices()
        .nth(skip)
        .map(|(idx, _)| idx)
        .unwrap_or(0);
    format!("…{}", &trimmed[start..])
}
