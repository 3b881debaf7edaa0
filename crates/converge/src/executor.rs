//! Execution engine - applies a plan wave by wave

use crate::context::{CancelFlag, NoProgress, ProgressCallback, Provider, Transport};
use crate::error::{Error, Result};
use crate::planner::{NodeId, Plan};
use crate::reconciler::{ReconcileOptions, Reconciler};
use crate::sequencer::{Sequencer, SequencerOptions};
use crate::step::BootstrapStep;
use crate::store::ResourceStore;
use crate::types::{NodeOutcome, ResolvedResource, ResourceSpec, RunSummary};
use rayon::prelude::*;

/// Options for executing a plan
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Number of parallel jobs within a wave
    pub jobs: usize,
    pub reconcile: ReconcileOptions,
    pub sequencer: SequencerOptions,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            jobs: 1,
            reconcile: ReconcileOptions::default(),
            sequencer: SequencerOptions::default(),
        }
    }
}

/// Runs plans against a provider and a transport
pub struct Executor<'a> {
    provider: &'a dyn Provider,
    transport: &'a dyn Transport,
    options: ExecuteOptions,
    cancel: CancelFlag,
    progress: &'a dyn ProgressCallback,
}

impl<'a> Executor<'a> {
    pub fn new(provider: &'a dyn Provider, transport: &'a dyn Transport) -> Self {
        Self {
            provider,
            transport,
            options: ExecuteOptions::default(),
            cancel: CancelFlag::new(),
            progress: &NoProgress,
        }
    }

    pub fn with_options(mut self, options: ExecuteOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: &'a dyn ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    /// Execute a plan built from `store` and `steps`
    ///
    /// Resources of a wave are reconciled (in parallel when `jobs > 1`) and
    /// recorded in the store once the whole wave succeeded. Steps of a wave
    /// go to the sequencer. The first failure stops the run; nothing already
    /// done is undone.
    pub fn execute(
        &self,
        plan: &Plan,
        store: &mut ResourceStore,
        steps: &[BootstrapStep],
    ) -> Result<RunSummary> {
        let reconciler = Reconciler::new(
            self.provider,
            self.transport,
            &self.options.reconcile,
            &self.cancel,
            self.progress,
        );
        let sequencer_options = SequencerOptions {
            jobs: self.options.jobs,
            ..self.options.sequencer.clone()
        };
        let sequencer = Sequencer::new(self.transport, &sequencer_options, &self.cancel, self.progress);
        let pool = self.thread_pool();

        let mut summary = RunSummary::default();

        for (index, wave) in plan.waves.iter().enumerate() {
            self.cancel.check()?;
            self.progress.on_wave_start(index, wave.len());
            log::debug!("Wave {}: {} node(s)", index + 1, wave.len());

            let view: &ResourceStore = store;
            let mut specs: Vec<&ResourceSpec> = Vec::new();
            let mut wave_steps: Vec<&BootstrapStep> = Vec::new();
            for node in wave {
                match node {
                    NodeId::Resource(id) => specs.push(view.spec(id).ok_or_else(|| {
                        Error::UnknownReference {
                            node: "plan".to_string(),
                            target: id.clone(),
                        }
                    })?),
                    NodeId::Step(name) => wave_steps.push(
                        steps.iter().find(|s| &s.name == name).ok_or_else(|| {
                            Error::UnknownReference {
                                node: "plan".to_string(),
                                target: node.to_string(),
                            }
                        })?,
                    ),
                }
            }

            let results: Vec<Result<ResolvedResource>> = match &pool {
                Some(pool) if specs.len() > 1 => pool.install(|| {
                    specs
                        .par_iter()
                        .map(|spec| self.resolve(&reconciler, view, spec))
                        .collect()
                }),
                _ => {
                    let mut results = Vec::with_capacity(specs.len());
                    for spec in &specs {
                        let result = self.resolve(&reconciler, view, spec);
                        let failed = result.is_err();
                        results.push(result);
                        if failed {
                            break;
                        }
                    }
                    results
                }
            };

            let resolved = results.into_iter().collect::<Result<Vec<_>>>()?;
            for resource in resolved {
                summary.add(&NodeOutcome::Resolved(resource.origin));
                store.insert_resolved(resource)?;
            }

            if !wave_steps.is_empty() {
                for outcome in sequencer.run_group(store, &wave_steps)? {
                    summary.add(&outcome);
                }
            }
        }

        log::info!(
            "Run complete: {} created, {} adopted, {} steps run",
            summary.created,
            summary.adopted,
            summary.steps_run
        );
        Ok(summary)
    }

    fn resolve(
        &self,
        reconciler: &Reconciler<'_>,
        store: &ResourceStore,
        spec: &ResourceSpec,
    ) -> Result<ResolvedResource> {
        self.cancel.check()?;
        let node = NodeId::Resource(spec.id.clone());
        self.progress
            .on_node_start(&node, &format!("{} {}", spec.kind, spec.name));

        let result = reconciler.reconcile(store, spec);
        match &result {
            Ok(resource) => self
                .progress
                .on_node_complete(&node, &NodeOutcome::Resolved(resource.origin)),
            Err(e) => {
                log::error!("Failed to resolve {}: {}", spec.id, e);
                self.progress.on_node_failed(&node, &e.to_string());
            }
        }
        result
    }

    fn thread_pool(&self) -> Option<rayon::ThreadPool> {
        if self.options.jobs <= 1 {
            return None;
        }
        match rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.jobs)
            .build()
        {
            Ok(pool) => Some(pool),
            Err(e) => {
                log::warn!("Failed to create thread pool, running sequentially: {e}");
                None
            }
        }
    }
}
