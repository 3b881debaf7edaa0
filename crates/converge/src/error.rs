//! Error types for reconciliation and bootstrap.
//!
//! Every fatal condition carries the failing node or step and the
//! underlying cause. [`ErrorKind`] gives each variant a stable name so
//! callers can report it and map it to an exit code.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Stable names for each error variant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    CycleDetected,
    UnknownReference,
    ForwardReference,
    DuplicateNode,
    InvalidConnection,
    UnresolvedAttribute,
    ResourceNotFound,
    Drift,
    ProviderError,
    UnreachableHost,
    MissingSecret,
    RemoteCommandFailed,
    TransferFailed,
    Cancelled,
}

impl ErrorKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CycleDetected => "CycleDetected",
            Self::UnknownReference => "UnknownReference",
            Self::ForwardReference => "ForwardReference",
            Self::DuplicateNode => "DuplicateNode",
            Self::InvalidConnection => "InvalidConnection",
            Self::UnresolvedAttribute => "UnresolvedAttribute",
            Self::ResourceNotFound => "ResourceNotFound",
            Self::Drift => "Drift",
            Self::ProviderError => "ProviderError",
            Self::UnreachableHost => "UnreachableHost",
            Self::MissingSecret => "MissingSecret",
            Self::RemoteCommandFailed => "RemoteCommandFailed",
            Self::TransferFailed => "TransferFailed",
            Self::Cancelled => "Cancelled",
        }
    }

    /// Whether the error is raised before any side effect
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::CycleDetected
                | Self::UnknownReference
                | Self::ForwardReference
                | Self::DuplicateNode
                | Self::InvalidConnection
                | Self::MissingSecret
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors that abort a plan or a run
#[derive(Debug, Error)]
pub enum Error {
    /// The dependency graph has a cycle
    #[error("dependency cycle detected among: {}", .nodes.join(", "))]
    CycleDetected {
        /// Nodes that could not be ordered, in declaration order
        nodes: Vec<String>,
    },

    /// A node names a dependency that was never declared
    #[error("{node} references unknown node '{target}'")]
    UnknownReference { node: String, target: String },

    /// A step depends on a step declared after it (or on itself)
    #[error("step '{step}' depends on '{target}', which is not declared before it")]
    ForwardReference { step: String, target: String },

    /// Two nodes share an id
    #[error("duplicate declaration of '{0}'")]
    DuplicateNode(String),

    /// A step's connection is not a connection resource
    #[error("step '{step}' uses '{resource}' as its connection, which is not a connection resource")]
    InvalidConnection { step: String, resource: String },

    /// An attribute was read before its producer resolved
    #[error("{node} needs {reference}, which is not resolved")]
    UnresolvedAttribute { node: String, reference: String },

    /// A lookup-mode resource does not exist
    #[error("{kind} '{name}' not found (required by {id})")]
    ResourceNotFound {
        id: String,
        kind: String,
        name: String,
    },

    /// An existing resource disagrees with its declaration
    #[error("{kind} '{name}' ({node}) exists with {key} = {observed}, but {desired} is declared")]
    Drift {
        node: String,
        kind: String,
        name: String,
        key: String,
        desired: String,
        observed: String,
    },

    /// The provider failed or rejected a request
    #[error("provider error on {node} after {attempts} attempt(s): {source}")]
    Provider {
        node: String,
        attempts: u32,
        #[source]
        source: ProviderError,
    },

    /// A host never accepted a connection
    #[error("host {host} unreachable after {}s: {last_error}", .waited.as_secs())]
    UnreachableHost {
        host: String,
        waited: Duration,
        last_error: String,
    },

    /// A required secret was not supplied
    #[error("missing secret '{0}'")]
    MissingSecret(String),

    /// A bootstrap command failed
    #[error(
        "step '{step}' failed at command {} (`{command}`): {}",
        .index + 1,
        describe_exit(.exit_code, .stderr)
    )]
    RemoteCommandFailed {
        step: String,
        index: usize,
        command: String,
        /// `None` when the command never produced an exit status
        exit_code: Option<i32>,
        stderr: String,
    },

    /// A file transfer failed
    #[error("step '{step}' failed to copy to {remote_path}: {message}")]
    TransferFailed {
        step: String,
        remote_path: String,
        message: String,
    },

    /// The run was interrupted
    #[error("run cancelled")]
    Cancelled,
}

fn describe_exit(exit_code: &Option<i32>, stderr: &str) -> String {
    let stderr = stderr.trim();
    match (exit_code, stderr.is_empty()) {
        (Some(code), true) => format!("exit status {code}"),
        (Some(code), false) => format!("exit status {code}: {stderr}"),
        (None, _) => stderr.to_string(),
    }
}

impl Error {
    /// Get the stable kind for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::CycleDetected { .. } => ErrorKind::CycleDetected,
            Self::UnknownReference { .. } => ErrorKind::UnknownReference,
            Self::ForwardReference { .. } => ErrorKind::ForwardReference,
            Self::DuplicateNode(_) => ErrorKind::DuplicateNode,
            Self::InvalidConnection { .. } => ErrorKind::InvalidConnection,
            Self::UnresolvedAttribute { .. } => ErrorKind::UnresolvedAttribute,
            Self::ResourceNotFound { .. } => ErrorKind::ResourceNotFound,
            Self::Drift { .. } => ErrorKind::Drift,
            Self::Provider { .. } => ErrorKind::ProviderError,
            Self::UnreachableHost { .. } => ErrorKind::UnreachableHost,
            Self::MissingSecret(_) => ErrorKind::MissingSecret,
            Self::RemoteCommandFailed { .. } => ErrorKind::RemoteCommandFailed,
            Self::TransferFailed { .. } => ErrorKind::TransferFailed,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// Error reported by a [`Provider`](crate::Provider) implementation
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ProviderError {
    /// Whether retrying may succeed (timeouts, rate limits, server errors)
    pub transient: bool,
    pub message: String,
}

impl ProviderError {
    /// A failure worth retrying
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            transient: true,
            message: message.into(),
        }
    }

    /// A failure that will not go away on retry
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            transient: false,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.transient
    }
}

/// Error reported by a [`Transport`](crate::Transport) implementation
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Result type for reconciliation operations
pub type Result<T> = std::result::Result<T, Error>;
