//! Error types for tool dispatch, run polling and the assistants API

use std::time::Duration;
use thiserror::Error;

/// Error talking to the remote assistants service, with a classification
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct AssistantError {
    pub kind: AssistantErrorKind,
    pub message: String,
}

impl AssistantError {
    pub fn new(kind: AssistantErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(AssistantErrorKind::NotFound, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(AssistantErrorKind::Network, message)
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(AssistantErrorKind::Server, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(AssistantErrorKind::Auth, message)
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(AssistantErrorKind::Decode, message)
    }

    /// Classify an HTTP error status
    pub fn from_status(status: u16, body: &str) -> Self {
        let kind = match status {
            404 => AssistantErrorKind::NotFound,
            401 | 403 => AssistantErrorKind::Auth,
            429 => AssistantErrorKind::RateLimit,
            500..=599 => AssistantErrorKind::Server,
            _ => AssistantErrorKind::InvalidRequest,
        };
        Self::new(kind, format!("assistants API error {status}: {body}"))
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == AssistantErrorKind::NotFound
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl From<reqwest::Error> for AssistantError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::decode(err.to_string())
        } else if let Some(status) = err.status() {
            Self::from_status(status.as_u16(), &err.to_string())
        } else {
            Self::network(err.to_string())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssistantErrorKind {
    /// Resource not visible yet (or gone)
    NotFound,
    /// Connection problems, timeouts - retryable
    Network,
    /// 429 - retryable
    RateLimit,
    /// 5xx - retryable
    Server,
    /// 401/403 - not retryable
    Auth,
    /// Other 4xx - not retryable
    InvalidRequest,
    /// Response body did not match the expected shape
    Decode,
}

impl AssistantErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network | Self::RateLimit | Self::Server)
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("malformed arguments for {tool}: {reason}")]
    MalformedArguments { tool: String, reason: String },
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("message is empty")]
    EmptyMessage,

    #[error("a run is already in progress")]
    Busy,

    #[error("run {run_id} ended with status {status}{}", reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    Failed {
        run_id: String,
        status: String,
        reason: Option<String>,
    },

    #[error("run {run_id} did not finish within {}s", waited.as_secs())]
    Timeout { run_id: String, waited: Duration },

    #[error(transparent)]
    Transport(#[from] AssistantError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(AssistantError::from_status(404, "").is_not_found());
        assert_eq!(AssistantError::from_status(401, "").kind, AssistantErrorKind::Auth);
        assert_eq!(AssistantError::from_status(403, "").kind, AssistantErrorKind::Auth);
        assert_eq!(AssistantError::from_status(429, "").kind, AssistantErrorKind::RateLimit);
        assert_eq!(AssistantError::from_status(503, "").kind, AssistantErrorKind::Server);
        assert_eq!(AssistantError::from_status(400, "").kind, AssistantErrorKind::InvalidRequest);
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(AssistantError::network("reset").is_retryable());
        assert!(AssistantError::server("502").is_retryable());
        assert!(!AssistantError::auth("bad key").is_retryable());
        assert!(!AssistantError::not_found("run").is_retryable());
    }

    #[test]
    fn test_run_error_messages() {
        let failed = RunError::Failed {
            run_id: "run_1".to_string(),
            status: "failed".to_string(),
            reason: Some("rate_limit_exceeded".to_string()),
        };
        assert_eq!(failed.to_string(), "run run_1 ended with status failed: rate_limit_exceeded");

        let cancelled = RunError::Failed {
            run_id: "run_2".to_string(),
            status: "cancelled".to_string(),
            reason: None,
        };
        assert_eq!(cancelled.to_string(), "run run_2 ended with status cancelled");

        let timeout = RunError::Timeout {
            run_id: "run_3".to_string(),
            waited: Duration::from_secs(120),
        };
        assert_eq!(timeout.to_string(), "run run_3 did not finish within 120s");
    }
}
