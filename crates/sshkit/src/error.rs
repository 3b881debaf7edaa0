//! Error types for SSH operations.

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Result type alias for SSH operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Categories of SSH errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The host could not be reached or refused the session (retryable).
    Connection,
    /// The remote side ran but reported a failure.
    Remote,
    /// A local tool (`ssh`, `ssh-keygen`) is missing or failed.
    Tool,
    /// Local filesystem error.
    Io,
}

impl ErrorCategory {
    /// Whether retrying may succeed, e.g. while a host is still booting.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection)
    }

    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Connection => "Host unreachable",
            Self::Remote => "Remote operation failed",
            Self::Tool => "Local SSH tooling failed",
            Self::Io => "Filesystem error",
        }
    }

    #[must_use]
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Connection => "Check that the host is up and the key is authorized",
            Self::Remote => "Check the remote command output above",
            Self::Tool => "Make sure OpenSSH (ssh, ssh-keygen) is installed and on PATH",
            Self::Io => "Check file permissions in the state directory",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Errors that can occur during SSH operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A local program could not be started.
    #[error("failed to execute {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// ssh could not establish a session.
    #[error("cannot connect to {host}: {message}")]
    Connection { host: String, message: String },

    /// Writing a remote file failed.
    #[error("failed to write {path}: {message}")]
    Transfer { path: String, message: String },

    /// ssh-keygen failed.
    #[error("key generation failed: {0}")]
    KeyGen(String),

    /// Invalid key name.
    #[error("invalid key name '{0}'")]
    InvalidKeyName(String),

    /// IO error during file operations.
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl Error {
    /// Create an IO error with path context.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Get the error category.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Connection { .. } => ErrorCategory::Connection,
            Self::Transfer { .. } => ErrorCategory::Remote,
            Self::Spawn { .. } | Self::KeyGen(_) | Self::InvalidKeyName(_) => ErrorCategory::Tool,
            Self::Io { .. } => ErrorCategory::Io,
        }
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        let conn = Error::Connection {
            host: "2001:db8::1".into(),
            message: "Connection refused".into(),
        };
        assert!(conn.is_retryable());
        assert!(!Error::KeyGen("boom".into()).is_retryable());
        assert_eq!(
            Error::Transfer {
                path: "a".into(),
                message: "b".into()
            }
            .category(),
            ErrorCategory::Remote
        );
    }
}
