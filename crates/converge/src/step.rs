//! Bootstrap steps - remote operations run against a resolved connection

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::fmt;

/// When a step that already ran on a previous apply runs again
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RerunPolicy {
    /// Run every step on every apply
    #[default]
    Always,
    /// Skip a step whose idempotency key matches the marker left on the host
    Checksum,
}

/// Remote operation performed by a step
#[derive(Clone)]
pub enum RemoteOperation {
    /// Write local content to a remote path, overwriting it
    CopyFile {
        /// Where the content came from, for display
        source: String,
        content: Vec<u8>,
        remote_path: String,
    },
    /// Run sub-commands in order; each must exit 0
    RunCommand {
        commands: Vec<String>,
        /// Fed to every sub-command's stdin; never logged
        stdin: Option<SecretString>,
    },
}

impl fmt::Debug for RemoteOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CopyFile {
                source,
                content,
                remote_path,
            } => f
                .debug_struct("CopyFile")
                .field("source", source)
                .field("bytes", &content.len())
                .field("remote_path", remote_path)
                .finish(),
            Self::RunCommand { commands, stdin } => f
                .debug_struct("RunCommand")
                .field("commands", commands)
                .field("stdin", &stdin.as_ref().map(|_| "[REDACTED]"))
                .finish(),
        }
    }
}

impl RemoteOperation {
    /// Key for serializing steps that touch the same remote state
    ///
    /// Copies to the same path conflict; all commands share one key.
    pub fn conflict_key(&self) -> String {
        match self {
            Self::CopyFile { remote_path, .. } => format!("path:{remote_path}"),
            Self::RunCommand { .. } => "shell".to_string(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::CopyFile { .. } => "copy",
            Self::RunCommand { .. } => "run",
        }
    }
}

/// A remote bootstrap step
#[derive(Debug, Clone)]
pub struct BootstrapStep {
    pub name: String,
    /// Id of the connection resource the step runs over
    pub connection: String,
    pub operation: RemoteOperation,
    /// Earlier steps or resources that must complete first
    pub depends_on: Vec<String>,
    pub idempotency_key: String,
}

impl BootstrapStep {
    /// A step that copies content to a remote path
    pub fn copy_file(
        name: impl Into<String>,
        connection: impl Into<String>,
        source: impl Into<String>,
        content: Vec<u8>,
        remote_path: impl Into<String>,
    ) -> Self {
        Self::new(
            name.into(),
            connection.into(),
            RemoteOperation::CopyFile {
                source: source.into(),
                content,
                remote_path: remote_path.into(),
            },
        )
    }

    /// A step that runs commands in order
    pub fn run<I, S>(name: impl Into<String>, connection: impl Into<String>, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            name.into(),
            connection.into(),
            RemoteOperation::RunCommand {
                commands: commands.into_iter().map(Into::into).collect(),
                stdin: None,
            },
        )
    }

    fn new(name: String, connection: String, operation: RemoteOperation) -> Self {
        let idempotency_key = compute_key(&name, &connection, &operation);
        Self {
            name,
            connection,
            operation,
            depends_on: Vec::new(),
            idempotency_key,
        }
    }

    /// Feed a secret to the step's commands on stdin
    ///
    /// Has no effect on copy steps. The secret is not part of the
    /// idempotency key.
    pub fn with_stdin_secret(mut self, secret: SecretString) -> Self {
        if let RemoteOperation::RunCommand { stdin, .. } = &mut self.operation {
            *stdin = Some(secret);
        }
        self
    }

    /// Add dependencies on earlier steps or resources
    pub fn after<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn description(&self) -> String {
        match &self.operation {
            RemoteOperation::CopyFile {
                source,
                remote_path,
                ..
            } => format!("Copy {source} to {remote_path}"),
            RemoteOperation::RunCommand { commands, .. } => match commands.len() {
                1 => format!("Run `{}`", commands[0]),
                n => format!("Run {n} commands"),
            },
        }
    }
}

fn compute_key(name: &str, connection: &str, operation: &RemoteOperation) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(name.as_bytes());
    hasher.update(&[0]);
    hasher.update(connection.as_bytes());
    hasher.update(&[0]);
    match operation {
        RemoteOperation::CopyFile {
            content,
            remote_path,
            ..
        } => {
            hasher.update(b"copy\0");
            hasher.update(remote_path.as_bytes());
            hasher.update(&[0]);
            hasher.update(content);
        }
        RemoteOperation::RunCommand { commands, .. } => {
            hasher.update(b"run\0");
            for command in commands {
                hasher.update(command.as_bytes());
                hasher.update(&[0]);
            }
        }
    }
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_changes_with_content() {
        let a = BootstrapStep::copy_file("c", "conn", "a.yml", b"one".to_vec(), "a.yml");
        let b = BootstrapStep::copy_file("c", "conn", "a.yml", b"two".to_vec(), "a.yml");
        let a2 = BootstrapStep::copy_file("c", "conn", "elsewhere", b"one".to_vec(), "a.yml");
        assert_ne!(a.idempotency_key, b.idempotency_key);
        assert_eq!(a.idempotency_key, a2.idempotency_key);
    }

    #[test]
    fn test_secret_not_in_key_or_debug() {
        let plain = BootstrapStep::run("login", "conn", ["docker login --password-stdin"]);
        let with_secret = plain
            .clone()
            .with_stdin_secret(SecretString::from("hunter2".to_string()));

        assert_eq!(plain.idempotency_key, with_secret.idempotency_key);
        let debug = format!("{with_secret:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_conflict_keys() {
        let copy = BootstrapStep::copy_file("c", "conn", "x", Vec::new(), "docker-compose.yml");
        let run = BootstrapStep::run("r", "conn", ["true"]);
        assert_eq!(copy.operation.conflict_key(), "path:docker-compose.yml");
        assert_eq!(run.operation.conflict_key(), "shell");
    }
}
