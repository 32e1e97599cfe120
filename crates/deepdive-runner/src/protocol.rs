//! Stdout marker protocol spoken by research workers.
//!
//! Workers print one marker per line. An opening block marker may trail
//! other text on its line, as may a progress marker:
//!
//! | Marker | Payload |
//! |---|---|
//! | `PROGRESS_UPDATE:<json>` | `{"stage": .., "progress": .., "details": ..}` |
//! | `AGENT_RESPONSE_START` / `AGENT_RESPONSE_END` | response body between them |
//! | `CITATIONS_START` / `CITATIONS_END` | one `[title](url)` per line |
//! | `PROCESSING_TIME:<float>` | seconds measured by the worker |
//!
//! Everything that knows about these strings lives here, so the relay and the
//! extractor only deal in lines and typed payloads.

use serde::Deserialize;

use crate::error::ProtocolError;

pub const PROGRESS_MARKER: &str = "PROGRESS_UPDATE:";
pub const RESPONSE_START: &str = "AGENT_RESPONSE_START";
pub const RESPONSE_END: &str = "AGENT_RESPONSE_END";
pub const CITATIONS_START: &str = "CITATIONS_START";
pub const CITATIONS_END: &str = "CITATIONS_END";
pub const PROCESSING_TIME_MARKER: &str = "PROCESSING_TIME:";

/// Decoded `PROGRESS_UPDATE:` payload.
///
/// Workers also send `type` and their own `timestamp`; those are ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProgressPayload {
    pub stage: String,
    pub progress: f64,
    #[serde(default)]
    pub details: Option<String>,
}

impl ProgressPayload {
    /// Progress as a percentage, rounded and clamped into 0..=100.
    pub fn percent(&self) -> u8 {
        if self.progress.is_nan() {
            return 0;
        }
        self.progress.round().clamp(0.0, 100.0) as u8
    }

    /// Details with empty strings treated as absent.
    pub fn details(&self) -> Option<String> {
        self.details.clone().filter(|d| !d.is_empty())
    }
}

/// Scan one stdout line for a progress marker.
///
/// Returns `None` when the line carries no marker. The marker may be preceded
/// by other text on the line; the payload runs to the end of the line.
pub fn parse_progress_line(line: &str) -> Option<Result<ProgressPayload, ProtocolError>> {
    let start = line.find(PROGRESS_MARKER)?;
    let payload = line[start + PROGRESS_MARKER.len()..].trim();
    Some(serde_json::from_str(payload).map_err(ProtocolError::from))
}

/// True if `line` opens a block: the marker ends the line.
///
/// Text before an opening marker is worker chatter that lost its newline.
pub fn opens_block(line: &str, marker: &str) -> bool {
    line.trim_end().ends_with(marker)
}

/// True if `line` closes a block: the marker starts the line.
pub fn closes_block(line: &str, marker: &str) -> bool {
    line.trim_start().starts_with(marker)
}

/// Parse a `PROCESSING_TIME:<float>` line.
pub fn parse_processing_time(line: &str) -> Option<f64> {
    let value = line.trim().strip_prefix(PROCESSING_TIME_MARKER)?;
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_progress_line() {
        let line = r#"PROGRESS_UPDATE:{"type":"progress_update","stage":"Analysis","progress":85,"details":"running","timestamp":"2024-01-01 00:00:00"}"#;
        let payload = parse_progress_line(line).unwrap().unwrap();

        assert_eq!(payload.stage, "Analysis");
        assert_eq!(payload.percent(), 85);
        assert_eq!(payload.details(), Some("running".to_string()));
    }

    #[test]
    fn test_progress_marker_after_prefix_text() {
        let line = r#"[worker] PROGRESS_UPDATE:{"stage":"Init","progress":15}"#;
        let payload = parse_progress_line(line).unwrap().unwrap();
        assert_eq!(payload.stage, "Init");
        assert_eq!(payload.details(), None);
    }

    #[test]
    fn test_non_marker_line() {
        assert!(parse_progress_line("[2024-01-01] [PYTHON-INFO] starting").is_none());
    }

    #[test]
    fn test_malformed_progress_payload() {
        let result = parse_progress_line("PROGRESS_UPDATE:{not json").unwrap();
        assert!(matches!(result, Err(ProtocolError::MalformedProgress(_))));
    }

    #[test]
    fn test_percent_clamping() {
        let over = ProgressPayload {
            stage: "x".into(),
            progress: 140.0,
            details: None,
        };
        let under = ProgressPayload {
            stage: "x".into(),
            progress: -3.0,
            details: None,
        };
        let fractional = ProgressPayload {
            stage: "x".into(),
            progress: 87.6,
            details: Some(String::new()),
        };
        assert_eq!(over.percent(), 100);
        assert_eq!(under.percent(), 0);
        assert_eq!(fractional.percent(), 88);
        assert_eq!(fractional.details(), None);
    }

    #[test]
    fn test_processing_time() {
        assert_eq!(parse_processing_time("PROCESSING_TIME:12.3"), Some(12.3));
        assert_eq!(parse_processing_time("  PROCESSING_TIME: 4 "), Some(4.0));
        assert_eq!(parse_processing_time("PROCESSING_TIME:abc"), None);
        assert_eq!(parse_processing_time("elapsed 12.3"), None);
    }

    #[test]
    fn test_block_marker_lines() {
        assert!(opens_block("AGENT_RESPONSE_START\r", RESPONSE_START));
        assert!(opens_block("Research done.AGENT_RESPONSE_START", RESPONSE_START));
        assert!(!opens_block("AGENT_RESPONSE_START follows", RESPONSE_START));
        assert!(closes_block("  AGENT_RESPONSE_END", RESPONSE_END));
        assert!(!closes_block("text AGENT_RESPONSE_END", RESPONSE_END));
    }
}
