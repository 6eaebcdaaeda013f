use std::time::Duration;

/// Failures talking to the external judge service.
/// Classifies errors as transient (retry) or final.
#[derive(Clone, Debug, thiserror::Error)]
pub enum JudgeError {
    // Transient
    #[error("judge unreachable: {0}")]
    Unreachable(String),
    #[error("judge server error {status}: {body}")]
    ServerError { status: u16, body: String },

    // Final
    #[error("judge timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed judge response: {0}")]
    MalformedResponse(String),
    #[error("judge rejected submission: {0}")]
    Rejected(String),
    #[error("judge circuit open")]
    CircuitOpen,
}

impl JudgeError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::ServerError { .. })
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Unreachable(_) => "unreachable",
            Self::ServerError { .. } => "server_error",
            Self::Timeout(_) => "timeout",
            Self::MalformedResponse(_) => "malformed_response",
            Self::Rejected(_) => "rejected",
            Self::CircuitOpen => "circuit_open",
        }
    }

    /// Classify an HTTP status code returned by the judge.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            400..=499 => Self::Rejected(format!("status {status}: {body}")),
            _ => Self::ServerError { status, body },
        }
    }
}

/// Failures resolving a challenge from the library.
#[derive(Debug, thiserror::Error)]
pub enum LibraryError {
    #[error("challenge not found: {0}")]
    NotFound(String),

    #[error("challenge library unavailable: {0}")]
    Unavailable(String),
}
