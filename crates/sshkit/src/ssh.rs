//! OpenSSH client wrapper.
//!
//! Every operation is one `ssh` invocation in batch mode. When a control
//! directory is configured, invocations share a master connection
//! (`ControlMaster=auto`), which also lets several commands run over the
//! same host at once.

use crate::error::{Error, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

/// Exit status ssh uses for its own failures.
const SSH_ERROR_EXIT: i32 = 255;

/// Stderr fragments ssh itself prints when it cannot set up a session.
const SSH_FAILURE_MARKERS: &[&str] = &[
    "ssh: ",
    "Permission denied (",
    "Host key verification failed",
    "Connection closed by",
    "Connection reset by",
    "Connection timed out",
    "kex_exchange_identification",
    "banner exchange",
    "Control socket connect",
];

/// Where to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub host: String,
    pub user: String,
    pub identity: PathBuf,
    pub port: u16,
}

impl SshTarget {
    pub fn new(host: impl Into<String>, user: impl Into<String>, identity: impl Into<PathBuf>) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            identity: identity.into(),
            port: 22,
        }
    }

    /// `user@host`
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

/// Client options.
#[derive(Debug, Clone)]
pub struct SshOptions {
    pub connect_timeout: Duration,
    /// Value for `StrictHostKeyChecking`
    pub host_key_checking: String,
    /// Known hosts file; ssh's default when `None`
    pub known_hosts: Option<PathBuf>,
    /// Directory for control sockets; enables connection sharing
    pub control_dir: Option<PathBuf>,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            host_key_checking: "accept-new".to_string(),
            known_hosts: None,
            control_dir: None,
        }
    }
}

/// Output of a remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Output {
    /// -1 when the command was killed by a signal
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl Output {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

/// Runs `ssh`.
#[derive(Debug, Clone)]
pub struct SshClient {
    program: String,
    options: SshOptions,
}

impl SshClient {
    pub fn new(options: SshOptions) -> Self {
        Self {
            program: "ssh".to_string(),
            options,
        }
    }

    /// Whether invocations share one master connection per host.
    pub fn multiplexing(&self) -> bool {
        self.options.control_dir.is_some()
    }

    /// Arguments before the destination.
    fn args(&self, target: &SshTarget) -> Vec<String> {
        let mut args = vec![
            "-i".to_string(),
            target.identity.display().to_string(),
            "-p".to_string(),
            target.port.to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "IdentitiesOnly=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.options.connect_timeout.as_secs().max(1)),
            "-o".to_string(),
            format!("StrictHostKeyChecking={}", self.options.host_key_checking),
        ];
        if let Some(known_hosts) = &self.options.known_hosts {
            args.push("-o".to_string());
            args.push(format!("UserKnownHostsFile={}", known_hosts.display()));
        }
        if let Some(dir) = &self.options.control_dir {
            args.extend([
                "-o".to_string(),
                "ControlMaster=auto".to_string(),
                "-o".to_string(),
                format!("ControlPath={}", dir.join("%C").display()),
                "-o".to_string(),
                "ControlPersist=60".to_string(),
            ]);
        }
        args
    }

    /// Run a command on the target.
    ///
    /// A non-zero remote exit is returned as output. Failing to connect is
    /// an error. Exit status 255 is ambiguous: it counts as a connection
    /// failure when stderr is empty or carries one of ssh's own messages, so
    /// a remote command that exits 255 with its own output is returned as is.
    pub fn exec(&self, target: &SshTarget, command: &str, stdin: Option<&[u8]>) -> Result<Output> {
        log::trace!("ssh {} {}", target.destination(), command);

        let mut child = Command::new(&self.program)
            .args(self.args(target))
            .arg(target.destination())
            .arg("--")
            .arg(command)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| Error::Spawn {
                program: self.program.clone(),
                source,
            })?;

        // Feed stdin from a separate thread so a chatty command cannot
        // block on a full stdout pipe while we are still writing.
        let output = thread::scope(|scope| {
            if let (Some(data), Some(mut pipe)) = (stdin, child.stdin.take()) {
                scope.spawn(move || {
                    if let Err(e) = pipe.write_all(data) {
                        log::debug!("Writing stdin to ssh failed: {e}");
                    }
                });
            }
            child.wait_with_output()
        })
        .map_err(|source| Error::Spawn {
            program: self.program.clone(),
            source,
        })?;

        let output = Output {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: output.stdout,
            stderr: output.stderr,
        };

        if output.exit_code == SSH_ERROR_EXIT && is_ssh_failure(&output.stderr_str()) {
            return Err(Error::Connection {
                host: target.host.clone(),
                message: output.stderr_str(),
            });
        }
        Ok(output)
    }

    /// Check that the host accepts a session.
    pub fn probe(&self, target: &SshTarget) -> Result<()> {
        let output = self.exec(target, "true", None)?;
        if output.success() {
            Ok(())
        } else {
            Err(Error::Connection {
                host: target.host.clone(),
                message: format!("probe exited with {}", output.exit_code),
            })
        }
    }

    /// Write `content` to `remote_path`, creating the parent directory.
    pub fn upload(&self, target: &SshTarget, content: &[u8], remote_path: &str) -> Result<()> {
        let command = upload_command(remote_path);
        let output = self.exec(target, &command, Some(content))?;
        if output.success() {
            Ok(())
        } else {
            Err(Error::Transfer {
                path: remote_path.to_string(),
                message: output.stderr_str(),
            })
        }
    }
}

impl Default for SshClient {
    fn default() -> Self {
        Self::new(SshOptions::default())
    }
}

fn is_ssh_failure(stderr: &str) -> bool {
    stderr.is_empty() || SSH_FAILURE_MARKERS.iter().any(|m| stderr.contains(m))
}

fn upload_command(remote_path: &str) -> String {
    let path = quote_path(remote_path);
    match Path::new(remote_path).parent() {
        Some(dir) if !dir.as_os_str().is_empty() && dir != Path::new("~") => format!(
            "mkdir -p {} && cat > {}",
            quote_path(&dir.to_string_lossy()),
            path
        ),
        _ => format!("cat > {path}"),
    }
}

/// Quote a string for a POSIX shell.
pub fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@%+,".contains(c))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Quote a remote path, keeping a leading `~/` expandable.
fn quote_path(path: &str) -> String {
    match path.strip_prefix("~/") {
        Some(rest) => format!("\"$HOME\"/{}", shell_quote(rest)),
        None => shell_quote(path),
    }
}
