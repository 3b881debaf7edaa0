//! Error types for Hetzner Cloud API calls.
//!
//! Errors are categorized so callers can decide whether to retry.

use std::fmt;

/// Result type alias for API operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Categories of API errors for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Connection failures and timeouts (transient, retryable).
    Network,
    /// Rate limit exceeded (retryable after backoff).
    RateLimited,
    /// Server-side failure (retryable).
    Server,
    /// Invalid or missing API token.
    Auth,
    /// Request rejected as invalid or conflicting.
    Rejected,
    /// Resource not found.
    NotFound,
    /// Response could not be decoded.
    Format,
}

impl ErrorCategory {
    /// Whether this error category is typically transient and worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network | Self::RateLimited | Self::Server)
    }

    /// Get a user-friendly description of this error category.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Network => "Network connectivity issue",
            Self::RateLimited => "API rate limit exceeded",
            Self::Server => "Hetzner Cloud API failure",
            Self::Auth => "Authentication failed",
            Self::Rejected => "Request rejected",
            Self::NotFound => "Resource not found",
            Self::Format => "Unexpected API response",
        }
    }

    /// Get actionable advice for resolving this error category.
    #[must_use]
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Network => "Check your internet connection and try again",
            Self::RateLimited => "Wait a moment and try again",
            Self::Server => "Check https://status.hetzner.com and try again later",
            Self::Auth => "Check that HCLOUD_TOKEN holds a read/write API token for the project",
            Self::Rejected => "Check the configured names, types and locations",
            Self::NotFound => "Verify the resource exists in the project",
            Self::Format => "The API may have changed; check for an update",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Errors that can occur when talking to the API.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The API answered with an error status.
    #[error("HTTP {status} ({code}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Hetzner error code, e.g. `uniqueness_error`.
        code: String,
        /// Error message from the API.
        message: String,
    },

    /// The request never got an answer.
    #[error("HTTP request failed: {0}")]
    Transport(String),

    /// The response body was not what we expected.
    #[error("invalid API response: {0}")]
    InvalidResponse(String),
}

impl Error {
    /// Get the error category for retry logic.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Api { status, code, .. } => match (*status, code.as_str()) {
                (429, _) | (_, "rate_limit_exceeded") => ErrorCategory::RateLimited,
                (401 | 403, _) | (_, "unauthorized" | "forbidden") => ErrorCategory::Auth,
                (404, _) | (_, "not_found") => ErrorCategory::NotFound,
                (_, "locked" | "conflict" | "resource_unavailable" | "timeout") => {
                    ErrorCategory::Server
                }
                (500..=599, _) => ErrorCategory::Server,
                _ => ErrorCategory::Rejected,
            },
            Self::Transport(_) => ErrorCategory::Network,
            Self::InvalidResponse(_) => ErrorCategory::Format,
        }
    }

    /// Whether this error is typically transient and worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }
}

impl From<ureq::Error> for Error {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::StatusCode(code) => Self::Api {
                status: code,
                code: String::new(),
                message: format!("HTTP {code}"),
            },
            ureq::Error::Json(e) => Self::InvalidResponse(e.to_string()),
            other => Self::Transport(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidResponse(err.to_string())
    }
}
