//! Engine transport over the system OpenSSH client.

use converge::{CommandOutput, ConnectionTarget, Session, Transport, TransportError};
use secrecy::{ExposeSecret, SecretString};
use sshkit::{SshClient, SshTarget};

pub struct SshTransport {
    client: SshClient,
}

impl SshTransport {
    pub fn new(client: SshClient) -> Self {
        Self { client }
    }
}

fn ssh_target(target: &ConnectionTarget) -> SshTarget {
    SshTarget::new(&target.host, &target.user, &target.private_key)
}

fn transport_error(err: sshkit::Error) -> TransportError {
    TransportError::new(err.to_string())
}

impl Transport for SshTransport {
    fn probe(&self, target: &ConnectionTarget) -> Result<(), TransportError> {
        self.client.probe(&ssh_target(target)).map_err(transport_error)
    }

    fn connect(&self, target: &ConnectionTarget) -> Result<Box<dyn Session>, TransportError> {
        Ok(Box::new(SshSession {
            client: self.client.clone(),
            target: ssh_target(target),
        }))
    }

    fn supports_multiplexing(&self) -> bool {
        self.client.multiplexing()
    }
}

/// One logical session; each call is a separate `ssh` invocation
struct SshSession {
    client: SshClient,
    target: SshTarget,
}

impl Session for SshSession {
    fn copy_file(&self, content: &[u8], remote_path: &str) -> Result<(), TransportError> {
        self.client
            .upload(&self.target, content, remote_path)
            .map_err(transport_error)
    }

    fn run_command(
        &self,
        command: &str,
        stdin: Option<&SecretString>,
    ) -> Result<CommandOutput, TransportError> {
        let input = stdin.map(|secret| secret.expose_secret().as_bytes());
        let output = self
            .client
            .exec(&self.target, command, input)
            .map_err(transport_error)?;
        Ok(CommandOutput {
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sshkit::SshOptions;
    use std::path::PathBuf;

    #[test]
    fn test_target_mapping() {
        let target = ConnectionTarget {
            host: "2001:db8:1::1".into(),
            user: "root".into(),
            private_key: "/state/keys/default".into(),
        };

        let ssh = ssh_target(&target);

        assert_eq!(ssh.destination(), "root@2001:db8:1::1");
        assert_eq!(ssh.identity, PathBuf::from("/state/keys/default"));
        assert_eq!(ssh.port, 22);
    }

    #[test]
    fn test_multiplexing_follows_control_dir() {
        let plain = SshTransport::new(SshClient::default());
        let shared = SshTransport::new(SshClient::new(SshOptions {
            control_dir: Some(PathBuf::from("/tmp/stackup-ctl")),
            ..Default::default()
        }));

        assert!(!plain.supports_multiplexing());
        assert!(shared.supports_multiplexing());
    }
}
