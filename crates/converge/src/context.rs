//! Provider, transport and callback traits
//!
//! These traits let the engine run without depending on a particular
//! cloud API, remote shell implementation or UI.

use crate::error::{ProviderError, TransportError};
use crate::planner::NodeId;
use crate::types::{Attributes, CommandOutput, ConnectionTarget, Kind, NodeOutcome};
use secrecy::SecretString;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Cloud provider operations used by the reconciler
///
/// Both calls must be safe to repeat: the reconciler reads by name before
/// every create so that a re-run adopts what an earlier run left behind.
pub trait Provider: Send + Sync {
    /// Read an existing resource by its provider-side name
    ///
    /// `hints` are the resolved desired attributes; lookups may use them to
    /// narrow the query (e.g. an image architecture).
    fn read_by_name(
        &self,
        kind: Kind,
        name: &str,
        hints: &Attributes,
    ) -> Result<Option<Attributes>, ProviderError>;

    /// Create a resource and return its observed attributes
    fn create(
        &self,
        kind: Kind,
        name: &str,
        attributes: &Attributes,
    ) -> Result<Attributes, ProviderError>;
}

/// An open remote shell
pub trait Session: Send + Sync {
    /// Write content to a remote path, creating parent directories
    fn copy_file(&self, content: &[u8], remote_path: &str) -> Result<(), TransportError>;

    /// Run a single command; a non-zero exit is reported in the output, not as an error
    fn run_command(
        &self,
        command: &str,
        stdin: Option<&SecretString>,
    ) -> Result<CommandOutput, TransportError>;
}

/// Remote shell transport
pub trait Transport: Send + Sync {
    /// Try once to reach the host
    fn probe(&self, target: &ConnectionTarget) -> Result<(), TransportError>;

    /// Open a session
    fn connect(&self, target: &ConnectionTarget) -> Result<Box<dyn Session>, TransportError>;

    /// Whether one session can run commands concurrently
    fn supports_multiplexing(&self) -> bool {
        false
    }
}

/// Progress callback for execution
///
/// Called from worker threads when nodes run in parallel.
pub trait ProgressCallback: Send + Sync {
    /// Called when starting a wave of independent nodes
    fn on_wave_start(&self, _index: usize, _count: usize) {}

    /// Called when starting a node
    fn on_node_start(&self, node: &NodeId, description: &str);

    /// Called when a node completes successfully
    fn on_node_complete(&self, node: &NodeId, outcome: &NodeOutcome);

    /// Called when a node fails
    fn on_node_failed(&self, _node: &NodeId, _error: &str) {}

    /// Called after each failed readiness probe
    fn on_wait(&self, _host: &str, _attempt: u32, _elapsed: Duration) {}

    /// Called before a provider call is retried
    fn on_retry(&self, _node: &str, _attempt: u32, _max_attempts: u32, _delay: Duration) {}
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_node_start(&self, _node: &NodeId, _description: &str) {}
    fn on_node_complete(&self, _node: &NodeId, _outcome: &NodeOutcome) {}
}

/// Shared cancellation flag
///
/// Cloning shares the flag. Checked between nodes and between readiness
/// probes; calls already in flight are allowed to finish.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Err(Cancelled) once cancelled
    pub fn check(&self) -> crate::Result<()> {
        if self.is_cancelled() {
            Err(crate::Error::Cancelled)
        } else {
            Ok(())
        }
    }
}
