//! Bootstrap sequencer - runs remote steps over resolved connections
//!
//! Sessions are opened lazily, one per connection resource, and reused by
//! every step bound to it. Steps handed over together are independent of
//! each other; they are grouped into lanes by conflict key and the lanes
//! may run concurrently when the transport multiplexes sessions.

use crate::context::{CancelFlag, ProgressCallback, Session, Transport};
use crate::error::{Error, Result, TransportError};
use crate::planner::NodeId;
use crate::step::{BootstrapStep, RemoteOperation, RerunPolicy};
use crate::store::ResourceStore;
use crate::types::{ConnectionTarget, NodeOutcome};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Default location of step markers, relative to the remote user's home
pub const DEFAULT_MARKER_DIR: &str = ".stackup/steps";

/// Options for running bootstrap steps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequencerOptions {
    pub rerun: RerunPolicy,
    /// Remote directory holding one marker file per completed step
    pub marker_dir: String,
    /// Lanes run concurrently only when greater than 1
    pub jobs: usize,
}

impl Default for SequencerOptions {
    fn default() -> Self {
        Self {
            rerun: RerunPolicy::default(),
            marker_dir: DEFAULT_MARKER_DIR.to_string(),
            jobs: 1,
        }
    }
}

pub struct Sequencer<'a> {
    transport: &'a dyn Transport,
    options: &'a SequencerOptions,
    cancel: &'a CancelFlag,
    progress: &'a dyn ProgressCallback,
    sessions: Mutex<HashMap<String, Arc<dyn Session>>>,
}

impl<'a> Sequencer<'a> {
    pub fn new(
        transport: &'a dyn Transport,
        options: &'a SequencerOptions,
        cancel: &'a CancelFlag,
        progress: &'a dyn ProgressCallback,
    ) -> Self {
        Self {
            transport,
            options,
            cancel,
            progress,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Run a group of mutually independent steps
    ///
    /// Outcomes are returned in input order. If any step fails, the first
    /// failure in input order is returned; steps queued behind the failing
    /// one never start.
    pub fn run_group(
        &self,
        store: &ResourceStore,
        steps: &[&BootstrapStep],
    ) -> Result<Vec<NodeOutcome>> {
        let lanes = lanes(steps);
        let parallel =
            self.options.jobs > 1 && lanes.len() > 1 && self.transport.supports_multiplexing();

        let lane_results: Vec<Vec<(usize, Result<NodeOutcome>)>> = if parallel {
            log::debug!("Running {} step lanes concurrently", lanes.len());
            match rayon::ThreadPoolBuilder::new()
                .num_threads(self.options.jobs)
                .build()
            {
                Ok(pool) => pool.install(|| {
                    lanes
                        .par_iter()
                        .map(|lane| self.run_lane(store, steps, lane))
                        .collect()
                }),
                Err(e) => {
                    log::warn!("Failed to create thread pool, running steps sequentially: {e}");
                    lanes.iter().map(|lane| self.run_lane(store, steps, lane)).collect()
                }
            }
        } else {
            // One lane in declaration order
            let all: Vec<usize> = (0..steps.len()).collect();
            vec![self.run_lane(store, steps, &all)]
        };

        let mut outcomes: Vec<Option<Result<NodeOutcome>>> = steps.iter().map(|_| None).collect();
        for (index, result) in lane_results.into_iter().flatten() {
            outcomes[index] = Some(result);
        }

        let mut done = Vec::with_capacity(steps.len());
        for outcome in outcomes.into_iter().flatten() {
            done.push(outcome?);
        }
        Ok(done)
    }

    /// Run steps of one lane in order, stopping at the first failure
    fn run_lane(
        &self,
        store: &ResourceStore,
        steps: &[&BootstrapStep],
        lane: &[usize],
    ) -> Vec<(usize, Result<NodeOutcome>)> {
        let mut results = Vec::with_capacity(lane.len());
        for &index in lane {
            let result = self.run_step(store, steps[index]);
            let failed = result.is_err();
            results.push((index, result));
            if failed {
                break;
            }
        }
        results
    }

    /// Run one step, reporting progress
    pub fn run_step(&self, store: &ResourceStore, step: &BootstrapStep) -> Result<NodeOutcome> {
        self.cancel.check()?;
        let node = NodeId::Step(step.name.clone());
        self.progress.on_node_start(&node, &step.description());

        let result = self.execute(store, step);
        match &result {
            Ok(outcome) => self.progress.on_node_complete(&node, outcome),
            Err(e) => self.progress.on_node_failed(&node, &e.to_string()),
        }
        result
    }

    fn execute(&self, store: &ResourceStore, step: &BootstrapStep) -> Result<NodeOutcome> {
        let session = self
            .session(store, &step.connection)
            .map_err(|e| operation_error(step, None, e))?;

        let marker = format!(
            "{}/{}",
            self.options.marker_dir.trim_end_matches('/'),
            step.name
        );
        if self.options.rerun == RerunPolicy::Checksum && marker_matches(session.as_ref(), &marker, step)
        {
            log::info!("Skipping step '{}': unchanged since last run", step.name);
            return Ok(NodeOutcome::Skipped {
                reason: "unchanged since last run".to_string(),
            });
        }

        match &step.operation {
            RemoteOperation::CopyFile {
                content,
                remote_path,
                ..
            } => {
                log::info!("Copying {} bytes to {}", content.len(), remote_path);
                session
                    .copy_file(content, remote_path)
                    .map_err(|e| operation_error(step, None, e))?;
            }
            RemoteOperation::RunCommand { commands, stdin } => {
                for (index, command) in commands.iter().enumerate() {
                    log::info!("[{}] {}", step.name, command);
                    let output = session
                        .run_command(command, stdin.as_ref())
                        .map_err(|e| operation_error(step, Some(index), e))?;
                    if !output.success() {
                        return Err(Error::RemoteCommandFailed {
                            step: step.name.clone(),
                            index,
                            command: command.clone(),
                            exit_code: Some(output.exit_code),
                            stderr: output.stderr_str(),
                        });
                    }
                    log::debug!("[{}] {}", step.name, output.stdout_str().trim_end());
                }
            }
        }

        if self.options.rerun == RerunPolicy::Checksum {
            session
                .copy_file(step.idempotency_key.as_bytes(), &marker)
                .map_err(|e| Error::TransferFailed {
                    step: step.name.clone(),
                    remote_path: marker.clone(),
                    message: e.message,
                })?;
        }

        Ok(NodeOutcome::Ran)
    }

    /// Get or open the session for a connection resource
    fn session(
        &self,
        store: &ResourceStore,
        connection: &str,
    ) -> std::result::Result<Arc<dyn Session>, TransportError> {
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|_| TransportError::new("session cache poisoned"))?;
        if let Some(session) = sessions.get(connection) {
            return Ok(Arc::clone(session));
        }

        let target = store
            .resolved(connection)
            .and_then(ConnectionTarget::from_resolved)
            .ok_or_else(|| TransportError::new(format!("connection '{connection}' is not resolved")))?;
        log::debug!("Opening session to {target}");
        let session: Arc<dyn Session> = Arc::from(self.transport.connect(&target)?);
        sessions.insert(connection.to_string(), Arc::clone(&session));
        Ok(session)
    }
}

/// Group step indices by conflict key, keeping declaration order within and across lanes
fn lanes(steps: &[&BootstrapStep]) -> Vec<Vec<usize>> {
    let mut keys: Vec<String> = Vec::new();
    let mut lanes: Vec<Vec<usize>> = Vec::new();
    for (index, step) in steps.iter().enumerate() {
        let key = format!("{}|{}", step.connection, step.operation.conflict_key());
        match keys.iter().position(|k| *k == key) {
            Some(lane) => lanes[lane].push(index),
            None => {
                keys.push(key);
                lanes.push(vec![index]);
            }
        }
    }
    lanes
}

fn marker_matches(session: &dyn Session, marker: &str, step: &BootstrapStep) -> bool {
    match session.run_command(&marker_read_command(marker), None) {
        Ok(output) if output.success() => output.stdout_str().trim() == step.idempotency_key,
        Ok(_) => false,
        Err(e) => {
            log::debug!("Could not read marker {marker}: {e}");
            false
        }
    }
}

/// `cat` of the marker path, single-quoted for the remote shell
fn marker_read_command(marker: &str) -> String {
    format!("cat '{}'", marker.replace('\'', r"'\''"))
}

fn operation_error(step: &BootstrapStep, index: Option<usize>, error: TransportError) -> Error {
    match &step.operation {
        RemoteOperation::CopyFile { remote_path, .. } => Error::TransferFailed {
            step: step.name.clone(),
            remote_path: remote_path.clone(),
            message: error.message,
        },
        RemoteOperation::RunCommand { commands, .. } => {
            let index = index.unwrap_or(0);
            Error::RemoteCommandFailed {
                step: step.name.clone(),
                index,
                command: commands.get(index).cloned().unwrap_or_default(),
                exit_code: None,
                stderr: error.message,
            }
        }
    }
}
