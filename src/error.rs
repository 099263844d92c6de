//! Error types for the screen-assist pipeline.
//!
//! Per-frame and per-tier failures stay inside the pipeline; only the
//! request-level variants ever reach the HTTP boundary.

use thiserror::Error;

/// Failure while turning submitted bytes into a usable frame.
///
/// A frame that fails decode is skipped without retry; the rest of the
/// batch continues.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("could not decode image bytes: {0}")]
    Decode(String),
}

/// Failure raised by a single OCR engine tier.
///
/// Timeouts are not represented here; the chain enforces the per-tier
/// budget from the outside and abandons overrunning workers.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("recognition failed: {0}")]
    Recognition(String),
    #[error("engine unavailable: {0}")]
    Unavailable(String),
}

/// Failure from the completion backend.
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("completion request timed out: {0}")]
    Timeout(String),
    #[error("completion backend error: {0}")]
    Upstream(String),
}

/// Request-level failures surfaced to the caller.
#[derive(Debug, Error)]
pub enum AssistError {
    /// Nothing readable was recovered from the whole batch. The HTTP layer
    /// turns this into user-facing guidance instead of an opaque error.
    #[error("no readable code detected in the submitted frames")]
    NoTextDetected,
    #[error("{0}")]
    UpstreamTimeout(String),
    #[error("{0}")]
    Upstream(String),
    #[error("{0} not set in environment")]
    ConfigurationMissing(&'static str),
}

impl From<CompletionError> for AssistError {
    fn from(err: CompletionError) -> Self {
        match err {
            CompletionError::Timeout(message) => AssistError::UpstreamTimeout(message),
            CompletionError::Upstream(message) => AssistError::Upstream(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_missing_message() {
        let err = AssistError::ConfigurationMissing("ANTHROPIC_API_KEY");
        assert_eq!(err.to_string(), "ANTHROPIC_API_KEY not set in environment");
    }

    #[test]
    fn test_completion_error_conversion() {
        let timeout: AssistError = CompletionError::Timeout("20s elapsed".to_string()).into();
        assert!(matches!(timeout, AssistError::UpstreamTimeout(_)));

        let upstream: AssistError = CompletionError::Upstream("500".to_string()).into();
        assert!(matches!(upstream, AssistError::Upstream(_)));
    }
}
