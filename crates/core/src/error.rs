use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Network,
    Remote,
    LocalStorage,
    UnsupportedFormat,
    CorruptDocument,
    RateLimit,
    Authentication,
    ServiceUnavailable,
    SchemaMismatch,
    Connection,
    EmptyInput,
    Configuration,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::Remote => "remote",
            ErrorKind::LocalStorage => "local_storage",
            ErrorKind::UnsupportedFormat => "unsupported_format",
            ErrorKind::CorruptDocument => "corrupt_document",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Authentication => "authentication",
            ErrorKind::ServiceUnavailable => "service_unavailable",
            ErrorKind::SchemaMismatch => "schema_mismatch",
            ErrorKind::Connection => "connection",
            ErrorKind::EmptyInput => "empty_input",
            ErrorKind::Configuration => "configuration",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Uniform failure shape every activity returns. Classification into a kind
/// happens inside the activity; retryability is decided by the policy engine.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq)]
#[error("{kind}: {message}")]
pub struct ActivityError {
    pub kind: ErrorKind,
    pub message: String,
    /// Server-provided retry hint, currently only set for rate-limit responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<Duration>,
}

impl ActivityError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, hint: Option<Duration>) -> Self {
        self.retry_after = hint;
        self
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("unknown run: {0}")]
    UnknownRun(String),

    #[error("persisted state for run {run_id} is unusable: {details}")]
    CorruptState { run_id: String, details: String },

    #[error("queue error: {0}")]
    Queue(String),
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::{ActivityError, ErrorKind};
    use std::time::Duration;

    #[test]
    fn activity_error_display_includes_kind_and_message() {
        let error = ActivityError::new(ErrorKind::Remote, "download returned 404");
        assert_eq!(error.to_string(), "remote: download returned 404");
    }

    #[test]
    fn retry_hint_round_trips_through_json() {
        let error = ActivityError::new(ErrorKind::RateLimit, "slow down")
            .with_retry_after(Some(Duration::from_secs(7)));

        let encoded = serde_json::to_string(&error).expect("serialize");
        let decoded: ActivityError = serde_json::from_str(&encoded).expect("deserialize");
        assert_eq!(decoded, error);
    }
}
