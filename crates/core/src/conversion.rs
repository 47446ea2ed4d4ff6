//! Document-conversion job status (raw document → Markdown).
//!
//! The backend reports conversion progress through
//! `GET /raw-documents/{id}/convert-status`; [`JobStatusResponse`] is the
//! decoded body of that endpoint.

use serde::{Deserialize, Deserializer, Serialize};

// ---------------------------------------------------------------------------
// Conversion status
// ---------------------------------------------------------------------------

/// Server-side state of a conversion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionStatus {
    /// No conversion has been picked up for the document yet.
    None,
    /// The converter is working on the document.
    Processing,
    /// Conversion finished and the Markdown output is available.
    Completed,
    /// Conversion failed; `error_message` carries the reason.
    Failed,
}

impl ConversionStatus {
    /// Wire representation of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

// ---------------------------------------------------------------------------
// Status response
// ---------------------------------------------------------------------------

/// Highest progress value the backend reports.
pub const MAX_PROGRESS: u8 = 100;

/// Body of the convert-status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub status: ConversionStatus,
    /// Completion percentage (0-100).
    #[serde(default, deserialize_with = "deserialize_progress")]
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl JobStatusResponse {
    pub fn new(status: ConversionStatus, progress: u8) -> Self {
        Self {
            status,
            progress: progress.min(MAX_PROGRESS),
            error_message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: ConversionStatus::Failed,
            progress: 0,
            error_message: Some(message.into()),
        }
    }

    /// Progress clamped to `0..=100`.
    pub fn progress(&self) -> u8 {
        self.progress.min(MAX_PROGRESS)
    }
}

/// Accept any JSON number (or `null`) and clamp it into `0..=100`.
fn deserialize_progress<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u8, D::Error> {
    let raw = Option::<f64>::deserialize(deserializer)?.unwrap_or(0.0);
    Ok(raw.clamp(0.0, f64::from(MAX_PROGRESS)) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_processing_body() {
        let body = r#"{"status":"processing","progress":42}"#;
        let parsed: JobStatusResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.status, ConversionStatus::Processing);
        assert_eq!(parsed.progress(), 42);
        assert!(parsed.error_message.is_none());
    }

    #[test]
    fn decodes_failed_body_with_message() {
        let body = r#"{"status":"failed","progress":0,"error_message":"unsupported format"}"#;
        let parsed: JobStatusResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.status, ConversionStatus::Failed);
        assert_eq!(parsed.error_message.as_deref(), Some("unsupported format"));
    }

    #[test]
    fn missing_progress_defaults_to_zero() {
        let parsed: JobStatusResponse = serde_json::from_str(r#"{"status":"none"}"#).unwrap();
        assert_eq!(parsed.status, ConversionStatus::None);
        assert_eq!(parsed.progress(), 0);
    }

    #[test]
    fn unknown_status_is_rejected() {
        assert!(serde_json::from_str::<JobStatusResponse>(r#"{"status":"queued"}"#).is_err());
    }

    #[test]
    fn out_of_range_progress_is_clamped() {
        let negative: JobStatusResponse =
            serde_json::from_str(r#"{"status":"processing","progress":-1}"#).unwrap();
        assert_eq!(negative.progress(), 0);

        let overshoot: JobStatusResponse =
            serde_json::from_str(r#"{"status":"processing","progress":300}"#).unwrap();
        assert_eq!(overshoot.progress(), 100);

        let fractional: JobStatusResponse =
            serde_json::from_str(r#"{"status":"processing","progress":42.7}"#).unwrap();
        assert_eq!(fractional.progress(), 42);

        let null: JobStatusResponse =
            serde_json::from_str(r#"{"status":"processing","progress":null}"#).unwrap();
        assert_eq!(null.progress(), 0);
    }
}
