use serde::{Deserialize, Serialize};

pub const RAW_PREVIEW_MAX: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    StructuredMissing,
    InvalidChannel,
    InvalidFitScore,
    EmptyResponse,
    ParserException,
    InvokeFailed,
    UnknownFailure,
}

impl FailureReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureReason::StructuredMissing => "structured_missing",
            FailureReason::InvalidChannel => "invalid_channel",
            FailureReason::InvalidFitScore => "invalid_fit_score",
            FailureReason::EmptyResponse => "empty_response",
            FailureReason::ParserException => "parser_exception",
            FailureReason::InvokeFailed => "invoke_failed",
            FailureReason::UnknownFailure => "unknown_failure",
        }
    }
}

/// Task-level failure surfaced to callers instead of an HTTP 5xx.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub reason: FailureReason,
    pub message: String,
    #[serde(rename = "rawPreview", skip_serializing_if = "Option::is_none")]
    pub raw_preview: Option<String>,
}

impl TaskFailure {
    pub fn new(reason: FailureReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
            raw_preview: None,
        }
    }

    pub fn with_preview(reason: FailureReason, message: impl Into<String>, raw: &str) -> Self {
        Self {
            reason,
            message: message.into(),
            raw_preview: Some(truncate_preview(raw)),
        }
    }
}

impl std::fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.reason.as_str(), self.message)
    }
}

/// Clip to `RAW_PREVIEW_MAX` chars on a char boundary.
pub fn truncate_preview(input: &str) -> String {
    if input.chars().count() <= RAW_PREVIEW_MAX {
        return input.to_string();
    }
    input.chars().take(RAW_PREVIEW_MAX).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_clamped_to_512_chars() {
        let long = "x".repeat(2000);
        let failure = TaskFailure::with_preview(FailureReason::StructuredMissing, "no json", &long);
        assert_eq!(failure.raw_preview.as_ref().map(|p| p.chars().count()), Some(512));
    }

    #[test]
    fn preview_respects_multibyte_boundaries() {
        let long = "é".repeat(600);
        let failure = TaskFailure::with_preview(FailureReason::EmptyResponse, "empty", &long);
        assert_eq!(failure.raw_preview.as_ref().map(|p| p.chars().count()), Some(512));
    }

    #[test]
    fn reason_serializes_snake_case() {
        let serialized = serde_json::to_string(&FailureReason::InvokeFailed).expect("serialize");
        assert_eq!(serialized, "\"invoke_failed\"");
    }
}
