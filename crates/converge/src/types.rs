//! Core types for declarative resource reconciliation

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Kind of a declared resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    /// Provider-allocated network address
    IpAddress,
    /// Public key registered with the provider
    SshKey,
    /// Locally generated key pair
    KeyPair,
    /// OS image, usually looked up by name
    Image,
    /// Virtual machine
    Server,
    /// Remote shell connection, derived from other resources
    Connection,
}

impl Kind {
    /// Stable snake_case name, used in output and ids
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IpAddress => "ip_address",
            Self::SshKey => "ssh_key",
            Self::KeyPair => "key_pair",
            Self::Image => "image",
            Self::Server => "server",
            Self::Connection => "connection",
        }
    }

    /// Whether this kind is resolved locally instead of through the provider
    pub fn is_derived(&self) -> bool {
        matches!(self, Self::Connection)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a resource is reconciled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Adopt an existing resource by name, create it otherwise
    Create,
    /// Only read an existing resource; never create
    Lookup,
}

/// A reference to another resource's resolved attribute
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    pub resource: String,
    pub attribute: String,
}

impl Reference {
    pub fn new(resource: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            attribute: attribute.into(),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource, self.attribute)
    }
}

/// An attribute value
///
/// `Ref` only appears in desired attributes; resolved attributes never
/// contain references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<Value>),
    Ref(Reference),
}

impl Value {
    /// Shorthand for a reference value
    pub fn reference(resource: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self::Ref(Reference::new(resource, attribute))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Collect every reference contained in this value, including nested lists
    pub fn references(&self) -> Vec<&Reference> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a Reference>) {
        match self {
            Self::Ref(r) => out.push(r),
            Self::List(items) => {
                for item in items {
                    item.collect_references(out);
                }
            }
            _ => {}
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Str(s) => f.write_str(s),
            Self::List(items) => {
                let rendered: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", rendered.join(", "))
            }
            Self::Ref(r) => write!(f, "${{{r}}}"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<Reference> for Value {
    fn from(r: Reference) -> Self {
        Self::Ref(r)
    }
}

/// Attribute map, ordered for deterministic output
pub type Attributes = BTreeMap<String, Value>;

/// A declared resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSpec {
    /// Unique id within the graph (stack-qualified)
    pub id: String,
    /// Name used with the provider
    pub name: String,
    pub kind: Kind,
    pub mode: Mode,
    /// Desired attributes; may contain references
    pub desired: Attributes,
    /// Explicit dependencies on other resources
    pub depends_on: Vec<String>,
}

impl ResourceSpec {
    /// Declare a resource that is created when absent
    pub fn create(kind: Kind, id: impl Into<String>) -> Self {
        Self::new(kind, Mode::Create, id.into())
    }

    /// Declare a resource that must already exist
    pub fn lookup(kind: Kind, id: impl Into<String>) -> Self {
        Self::new(kind, Mode::Lookup, id.into())
    }

    fn new(kind: Kind, mode: Mode, id: String) -> Self {
        Self {
            name: id.clone(),
            id,
            kind,
            mode,
            desired: Attributes::new(),
            depends_on: Vec::new(),
        }
    }

    /// Override the provider-side name
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set a desired attribute
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.desired.insert(key.into(), value.into());
        self
    }

    /// Add explicit dependencies
    pub fn after<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Ids of every resource this spec depends on, explicit first, in order, deduplicated
    pub fn dependencies(&self) -> Vec<&str> {
        let mut deps: Vec<&str> = Vec::new();
        let referenced = self
            .desired
            .values()
            .flat_map(Value::references)
            .map(|r| r.resource.as_str());
        for id in self.depends_on.iter().map(String::as_str).chain(referenced) {
            if !deps.contains(&id) {
                deps.push(id);
            }
        }
        deps
    }
}

/// How a resolved resource came to exist in this run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Created by this run
    Created,
    /// Already existed; adopted instead of created
    Adopted,
    /// Read in lookup mode
    LookedUp,
    /// Computed locally from other resources
    Derived,
}

/// A resource after reconciliation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedResource {
    pub id: String,
    pub kind: Kind,
    pub name: String,
    pub attributes: Attributes,
    pub origin: Origin,
}

impl ResolvedResource {
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }
}

/// Where and how to open a remote shell
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionTarget {
    pub host: String,
    pub user: String,
    pub private_key: String,
}

impl ConnectionTarget {
    /// Build a target from a resolved connection resource
    pub fn from_resolved(resource: &ResolvedResource) -> Option<Self> {
        Some(Self {
            host: resource.attribute("host")?.as_str()?.to_string(),
            user: resource.attribute("user")?.as_str()?.to_string(),
            private_key: resource.attribute("private_key")?.as_str()?.to_string(),
        })
    }
}

impl fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.host)
    }
}

/// Output from a remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Get stdout as a string
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    /// Get stderr as a string
    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }
}

/// Result of running a single plan node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeOutcome {
    /// Resource resolved with the given origin
    Resolved(Origin),
    /// Step executed
    Ran,
    /// Step skipped
    Skipped { reason: String },
}

/// Summary of a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub created: usize,
    pub adopted: usize,
    pub looked_up: usize,
    pub derived: usize,
    pub steps_run: usize,
    pub steps_skipped: usize,
}

impl RunSummary {
    /// Record a node outcome
    pub fn add(&mut self, outcome: &NodeOutcome) {
        match outcome {
            NodeOutcome::Resolved(Origin::Created) => self.created += 1,
            NodeOutcome::Resolved(Origin::Adopted) => self.adopted += 1,
            NodeOutcome::Resolved(Origin::LookedUp) => self.looked_up += 1,
            NodeOutcome::Resolved(Origin::Derived) => self.derived += 1,
            NodeOutcome::Ran => self.steps_run += 1,
            NodeOutcome::Skipped { .. } => self.steps_skipped += 1,
        }
    }

    /// Number of resources resolved
    pub fn resources(&self) -> usize {
        self.created + self.adopted + self.looked_up + self.derived
    }

    /// Total number of nodes processed
    pub fn total(&self) -> usize {
        self.resources() + self.steps_run + self.steps_skipped
    }
}
