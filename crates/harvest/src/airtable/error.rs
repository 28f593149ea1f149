//! Remote API error taxonomy

/// Errors surfaced by the remote API
///
/// The sync engine only cares about the class of a failure: transient
/// failures are retried, not-found means the resource is gone upstream,
/// forbidden is interpreted per call site, everything else aborts the
/// enclosing unit of work.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ApiError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("unexpected status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl ApiError {
    /// Timeout-class failures worth retrying after a backoff
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Timeout(_) | ApiError::RateLimited(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound(_))
    }

    pub fn is_forbidden(&self) -> bool {
        matches!(self, ApiError::Forbidden(_))
    }

    /// Map an HTTP status to an error for the given request description
    pub fn from_status(status: u16, what: impl Into<String>) -> Self {
        let what = what.into();
        match status {
            404 => ApiError::NotFound(what),
            403 => ApiError::Forbidden(what),
            429 => ApiError::RateLimited(what),
            408 | 504 => ApiError::Timeout(what),
            _ => ApiError::Status {
                status,
                message: what,
            },
        }
    }
}

impl From<std::io::Error> for ApiError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::TimedOut {
            ApiError::Timeout(e.to_string())
        } else {
            ApiError::Io(e.to_string())
        }
    }
}
