//! # Converge
//!
//! Declarative resource reconciliation and remote bootstrap sequencing.
//!
//! Resources are declared once with desired attributes that may reference
//! other resources' outputs. The planner turns those references and explicit
//! dependencies into an ordered plan; the executor walks the plan, reading
//! existing provider state before creating anything, waits for new hosts to
//! accept connections, and runs bootstrap steps over the resolved connection.
//!
//! ## Core Concepts
//!
//! - **ResourceSpec**: A declared resource (kind, name, mode, desired attributes)
//! - **Value::Ref**: A placeholder for another resource's resolved attribute
//! - **Plan**: Dependency-ordered nodes, grouped into waves of independent nodes
//! - **Reconciler**: Create (adopting existing resources), look up or derive
//! - **ReadinessGate**: Polls a host until it accepts connections
//! - **Sequencer**: Runs copy and command steps over lazily opened sessions
//!
//! ## Example
//!
//! ```ignore
//! use converge::{
//!     build_plan, BootstrapStep, Executor, Kind, ResourceSpec, ResourceStore, Value,
//! };
//!
//! let store = ResourceStore::from_specs([
//!     ResourceSpec::create(Kind::IpAddress, "ip").with("type", "ipv6"),
//!     ResourceSpec::create(Kind::Server, "web").with("ipv6", Value::reference("ip", "id")),
//!     ResourceSpec::create(Kind::Connection, "ssh")
//!         .with("host", Value::reference("web", "ipv6_address"))
//!         .with("private_key", "/home/me/.ssh/id_rsa"),
//! ])?;
//! let steps = vec![BootstrapStep::run("install", "ssh", ["apt-get update"])];
//!
//! let plan = build_plan(&store, &steps)?;
//! let summary = Executor::new(&provider, &transport).execute(&plan, &mut store, &steps)?;
//! ```
//!
//! ## Provider Traits
//!
//! - [`Provider`]: Reads and creates cloud resources
//! - [`Transport`] / [`Session`]: Probes hosts, copies files, runs commands
//! - [`ProgressCallback`]: Receives progress updates
//!
//! The engine has no dependency on a particular cloud API, SSH
//! implementation or UI.

pub mod context;
pub mod diff;
pub mod error;
pub mod executor;
pub mod planner;
pub mod readiness;
pub mod reconciler;
pub mod retry;
pub mod sequencer;
pub mod step;
pub mod store;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export main types at crate root
pub use context::{CancelFlag, NoProgress, ProgressCallback, Provider, Session, Transport};
pub use diff::{DiffSummary, NodePreview, PlannedAction, preview};
pub use error::{Error, ErrorKind, ProviderError, Result, TransportError};
pub use executor::{ExecuteOptions, Executor};
pub use planner::{NodeId, Plan, build_plan};
pub use readiness::{ReadinessConfig, ReadinessGate, ReadinessPolicy};
pub use reconciler::{ReconcileOptions, Reconciler};
pub use retry::RetryConfig;
pub use sequencer::{DEFAULT_MARKER_DIR, Sequencer, SequencerOptions};
pub use step::{BootstrapStep, RemoteOperation, RerunPolicy};
pub use store::ResourceStore;
pub use types::{
    Attributes, CommandOutput, ConnectionTarget, Kind, Mode, NodeOutcome, Origin, Reference,
    ResolvedResource, ResourceSpec, RunSummary, Value,
};
