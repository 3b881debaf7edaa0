//! Resource descriptor store
//!
//! Holds the declared specs in declaration order and the resolved entry
//! for each one. Resolved entries are append-only: a spec resolves at most
//! once per run.

use crate::error::{Error, Result};
use crate::types::{Attributes, Reference, ResolvedResource, ResourceSpec, Value};
use std::collections::HashMap;

/// Declared specs and their resolved state
#[derive(Debug, Default)]
pub struct ResourceStore {
    specs: Vec<ResourceSpec>,
    index: HashMap<String, usize>,
    resolved: HashMap<String, ResolvedResource>,
}

impl ResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from specs, rejecting duplicate ids
    pub fn from_specs(specs: impl IntoIterator<Item = ResourceSpec>) -> Result<Self> {
        let mut store = Self::new();
        for spec in specs {
            store.declare(spec)?;
        }
        Ok(store)
    }

    /// Declare a spec
    pub fn declare(&mut self, spec: ResourceSpec) -> Result<()> {
        if self.index.contains_key(&spec.id) {
            return Err(Error::DuplicateNode(spec.id));
        }
        self.index.insert(spec.id.clone(), self.specs.len());
        self.specs.push(spec);
        Ok(())
    }

    /// Specs in declaration order
    pub fn specs(&self) -> &[ResourceSpec] {
        &self.specs
    }

    pub fn spec(&self, id: &str) -> Option<&ResourceSpec> {
        self.index.get(id).map(|&i| &self.specs[i])
    }

    /// Declaration index of a spec
    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Record a resolved resource
    ///
    /// Fails if the id was never declared or was already resolved.
    pub fn insert_resolved(&mut self, resolved: ResolvedResource) -> Result<()> {
        if !self.index.contains_key(&resolved.id) {
            return Err(Error::UnknownReference {
                node: "store".to_string(),
                target: resolved.id,
            });
        }
        if self.resolved.contains_key(&resolved.id) {
            return Err(Error::DuplicateNode(resolved.id));
        }
        self.resolved.insert(resolved.id.clone(), resolved);
        Ok(())
    }

    pub fn resolved(&self, id: &str) -> Option<&ResolvedResource> {
        self.resolved.get(id)
    }

    pub fn is_resolved(&self, id: &str) -> bool {
        self.resolved.contains_key(id)
    }

    /// Resolved resources in declaration order
    pub fn resolved_in_order(&self) -> impl Iterator<Item = &ResolvedResource> {
        self.specs.iter().filter_map(|s| self.resolved.get(&s.id))
    }

    /// Read a resolved attribute on behalf of `node`
    pub fn lookup(&self, node: &str, reference: &Reference) -> Result<&Value> {
        self.resolved
            .get(&reference.resource)
            .and_then(|r| r.attribute(&reference.attribute))
            .ok_or_else(|| Error::UnresolvedAttribute {
                node: node.to_string(),
                reference: reference.to_string(),
            })
    }

    /// Replace every reference in `value` with its resolved value
    pub fn resolve_value(&self, node: &str, value: &Value) -> Result<Value> {
        match value {
            Value::Ref(reference) => self.lookup(node, reference).cloned(),
            Value::List(items) => items
                .iter()
                .map(|item| self.resolve_value(node, item))
                .collect::<Result<Vec<_>>>()
                .map(Value::List),
            other => Ok(other.clone()),
        }
    }

    /// Resolve all desired attributes of a spec
    pub fn resolve_attributes(&self, spec: &ResourceSpec) -> Result<Attributes> {
        spec.desired
            .iter()
            .map(|(key, value)| Ok::<_, Error>((key.clone(), self.resolve_value(&spec.id, value)?)))
            .collect()
    }

    /// Every resource `id` depends on, directly or transitively
    pub fn ancestors(&self, id: &str) -> Vec<&ResourceSpec> {
        let mut seen: Vec<&str> = Vec::new();
        let mut stack: Vec<&str> = vec![id];
        let mut out = Vec::new();
        while let Some(current) = stack.pop() {
            let Some(spec) = self.spec(current) else {
                continue;
            };
            for dep in spec.dependencies() {
                if !seen.contains(&dep) {
                    seen.push(dep);
                    if let Some(dep_spec) = self.spec(dep) {
                        out.push(dep_spec);
                    }
                    stack.push(dep);
                }
            }
        }
        out
    }
}
