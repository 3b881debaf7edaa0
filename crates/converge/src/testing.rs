//! In-memory provider and transport for engine tests

use crate::context::{Provider, Session, Transport};
use crate::error::{ProviderError, TransportError};
use crate::types::{Attributes, CommandOutput, ConnectionTarget, Kind, Value};
use secrecy::{ExposeSecret, SecretString};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Provider backed by a map keyed on (kind, name)
#[derive(Default)]
pub(crate) struct MockProvider {
    existing: Mutex<HashMap<(Kind, String), Attributes>>,
    failures: Mutex<VecDeque<ProviderError>>,
    reads: AtomicUsize,
    creates: AtomicUsize,
    created: Mutex<Vec<String>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a resource that already exists provider-side
    pub fn with_existing(self, kind: Kind, name: &str, attributes: Attributes) -> Self {
        self.existing
            .lock()
            .unwrap()
            .insert((kind, name.to_string()), attributes);
        self
    }

    /// Make the next call fail with `error`
    pub fn fail_next(&self, error: ProviderError) {
        self.failures.lock().unwrap().push_back(error);
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn create_count(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn call_count(&self) -> usize {
        self.read_count() + self.create_count()
    }

    /// Names passed to `create`, in call order
    pub fn created_names(&self) -> Vec<String> {
        self.created.lock().unwrap().clone()
    }

    fn injected_failure(&self) -> Result<(), ProviderError> {
        match self.failures.lock().unwrap().pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl Provider for MockProvider {
    fn read_by_name(
        &self,
        kind: Kind,
        name: &str,
        _hints: &Attributes,
    ) -> Result<Option<Attributes>, ProviderError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.injected_failure()?;
        Ok(self
            .existing
            .lock()
            .unwrap()
            .get(&(kind, name.to_string()))
            .cloned())
    }

    fn create(
        &self,
        kind: Kind,
        name: &str,
        attributes: &Attributes,
    ) -> Result<Attributes, ProviderError> {
        let n = self.creates.fetch_add(1, Ordering::SeqCst) + 1;
        self.injected_failure()?;

        let mut observed = attributes.clone();
        observed.insert("id".into(), Value::Int(n as i64));
        observed.insert("name".into(), Value::from(name));
        match kind {
            Kind::IpAddress => {
                let ip = if attributes.get("type").and_then(Value::as_str) == Some("ipv6") {
                    format!("2001:db8:{n}::/64")
                } else {
                    format!("203.0.113.{n}")
                };
                observed.insert("ip".into(), Value::from(ip));
            }
            Kind::Server => {
                observed.insert("ipv4_address".into(), Value::from(format!("198.51.100.{n}")));
                observed.insert("ipv6_address".into(), Value::from(format!("2001:db8:{n}::1")));
                observed.insert("status".into(), Value::from("running"));
            }
            Kind::KeyPair => {
                observed.insert("private_key_path".into(), Value::from(format!("/keys/{name}")));
                observed.insert("public_key".into(), Value::from(format!("ssh-rsa AAAA {name}")));
            }
            Kind::SshKey => {
                observed.insert("fingerprint".into(), Value::from("aa:bb:cc"));
            }
            Kind::Image | Kind::Connection => {}
        }

        self.existing
            .lock()
            .unwrap()
            .insert((kind, name.to_string()), observed.clone());
        self.created.lock().unwrap().push(name.to_string());
        Ok(observed)
    }
}

/// Shared record of what sessions did
#[derive(Default)]
struct Remote {
    /// `copy:<path>` and `run:<command>` entries in order
    log: Vec<String>,
    files: HashMap<String, Vec<u8>>,
    /// Secrets seen on stdin
    stdin: Vec<String>,
    /// Command substring and the exit code it produces
    failing: Vec<(String, i32)>,
    broken_copy: bool,
}

/// Transport whose host becomes reachable a fixed time after creation
pub(crate) struct MockTransport {
    started: Instant,
    reachable_after: Duration,
    multiplexing: bool,
    probes: AtomicUsize,
    connects: AtomicUsize,
    remote: Arc<Mutex<Remote>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::reachable_after(Duration::ZERO)
    }

    pub fn reachable_after(delay: Duration) -> Self {
        Self {
            started: Instant::now(),
            reachable_after: delay,
            multiplexing: false,
            probes: AtomicUsize::new(0),
            connects: AtomicUsize::new(0),
            remote: Arc::default(),
        }
    }

    pub fn with_multiplexing(mut self) -> Self {
        self.multiplexing = true;
        self
    }

    /// Commands containing `needle` exit with `code`
    pub fn failing(self, needle: &str, code: i32) -> Self {
        self.remote
            .lock()
            .unwrap()
            .failing
            .push((needle.to_string(), code));
        self
    }

    /// Every copy fails
    pub fn with_broken_copy(self) -> Self {
        self.remote.lock().unwrap().broken_copy = true;
        self
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn log(&self) -> Vec<String> {
        self.remote.lock().unwrap().log.clone()
    }

    pub fn stdin_seen(&self) -> Vec<String> {
        self.remote.lock().unwrap().stdin.clone()
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.remote.lock().unwrap().files.get(path).cloned()
    }
}

impl Transport for MockTransport {
    fn probe(&self, _target: &ConnectionTarget) -> Result<(), TransportError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.started.elapsed() >= self.reachable_after {
            Ok(())
        } else {
            Err(TransportError::new("connection refused"))
        }
    }

    fn connect(&self, target: &ConnectionTarget) -> Result<Box<dyn Session>, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.probe(target)?;
        Ok(Box::new(MockSession {
            remote: Arc::clone(&self.remote),
        }))
    }

    fn supports_multiplexing(&self) -> bool {
        self.multiplexing
    }
}

struct MockSession {
    remote: Arc<Mutex<Remote>>,
}

impl Session for MockSession {
    fn copy_file(&self, content: &[u8], remote_path: &str) -> Result<(), TransportError> {
        let mut remote = self.remote.lock().unwrap();
        if remote.broken_copy {
            return Err(TransportError::new("scp: permission denied"));
        }
        remote.log.push(format!("copy:{remote_path}"));
        remote.files.insert(remote_path.to_string(), content.to_vec());
        Ok(())
    }

    fn run_command(
        &self,
        command: &str,
        stdin: Option<&SecretString>,
    ) -> Result<CommandOutput, TransportError> {
        let mut remote = self.remote.lock().unwrap();

        if let Some(path) = command.strip_prefix("cat ") {
            let path = path.trim_matches('\'');
            return Ok(match remote.files.get(path) {
                Some(content) => CommandOutput {
                    exit_code: 0,
                    stdout: content.clone(),
                    stderr: Vec::new(),
                },
                None => CommandOutput {
                    exit_code: 1,
                    stdout: Vec::new(),
                    stderr: b"No such file or directory".to_vec(),
                },
            });
        }

        remote.log.push(format!("run:{command}"));
        if let Some(secret) = stdin {
            remote.stdin.push(secret.expose_secret().to_string());
        }

        let exit_code = remote
            .failing
            .iter()
            .find(|(needle, _)| command.contains(needle.as_str()))
            .map_or(0, |(_, code)| *code);
        Ok(CommandOutput {
            exit_code,
            stdout: Vec::new(),
            stderr: if exit_code == 0 {
                Vec::new()
            } else {
                format!("{command}: failed").into_bytes()
            },
        })
    }
}
