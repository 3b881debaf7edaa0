//! Reconciler - turns a declared resource into a resolved one
//!
//! Lookup-mode resources are read and must exist. Create-mode resources
//! are read by name first and adopted when present, so a second apply
//! against the same provider state creates nothing. An adopted resource
//! must agree with its declaration on every attribute both sides carry;
//! a disagreement stops the run with [`Error::Drift`]. Connections are
//! derived locally and then held behind the readiness gate.

use crate::context::{CancelFlag, ProgressCallback, Provider, Transport};
use crate::error::{Error, ProviderError, Result};
use crate::readiness::{ReadinessConfig, ReadinessGate};
use crate::retry::{RetryCallback, RetryConfig, with_retry};
use crate::store::ResourceStore;
use crate::types::{
    Attributes, ConnectionTarget, Kind, Mode, Origin, ResolvedResource, ResourceSpec, Value,
};
use std::time::Duration;

/// Options for resource reconciliation
#[derive(Debug, Clone, Default)]
pub struct ReconcileOptions {
    pub retry: RetryConfig,
    pub readiness: ReadinessConfig,
}

/// Forwards retry notifications for one node to the progress callback
struct NodeRetry<'a> {
    node: &'a str,
    progress: &'a dyn ProgressCallback,
}

impl RetryCallback for NodeRetry<'_> {
    fn on_retry(&self, attempt: u32, max_attempts: u32, _error: &ProviderError, delay: Duration) {
        self.progress
            .on_retry(self.node, attempt, max_attempts, delay);
    }
}

pub struct Reconciler<'a> {
    provider: &'a dyn Provider,
    transport: &'a dyn Transport,
    options: &'a ReconcileOptions,
    cancel: &'a CancelFlag,
    progress: &'a dyn ProgressCallback,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        provider: &'a dyn Provider,
        transport: &'a dyn Transport,
        options: &'a ReconcileOptions,
        cancel: &'a CancelFlag,
        progress: &'a dyn ProgressCallback,
    ) -> Self {
        Self {
            provider,
            transport,
            options,
            cancel,
            progress,
        }
    }

    /// Resolve a single spec against the store and the provider
    ///
    /// The store is only read; the caller records the result.
    pub fn reconcile(&self, store: &ResourceStore, spec: &ResourceSpec) -> Result<ResolvedResource> {
        let desired = store.resolve_attributes(spec)?;

        let (attributes, origin) = if spec.kind.is_derived() {
            self.derive_connection(store, spec, desired)?
        } else {
            match spec.mode {
                Mode::Lookup => (self.lookup(spec, &desired)?, Origin::LookedUp),
                Mode::Create => self.read_or_create(spec, &desired)?,
            }
        };

        Ok(ResolvedResource {
            id: spec.id.clone(),
            kind: spec.kind,
            name: spec.name.clone(),
            attributes,
            origin,
        })
    }

    fn lookup(&self, spec: &ResourceSpec, desired: &Attributes) -> Result<Attributes> {
        log::debug!("Looking up {} '{}'", spec.kind, spec.name);
        self.read(spec, desired)?
            .ok_or_else(|| Error::ResourceNotFound {
                id: spec.id.clone(),
                kind: spec.kind.to_string(),
                name: spec.name.clone(),
            })
    }

    fn read_or_create(
        &self,
        spec: &ResourceSpec,
        desired: &Attributes,
    ) -> Result<(Attributes, Origin)> {
        if let Some(existing) = self.read(spec, desired)? {
            if let Some((key, wanted, found)) = first_conflict(desired, &existing) {
                return Err(Error::Drift {
                    node: spec.id.clone(),
                    kind: spec.kind.to_string(),
                    name: spec.name.clone(),
                    key: key.to_string(),
                    desired: wanted.to_string(),
                    observed: found.to_string(),
                });
            }
            log::info!("Adopting existing {} '{}'", spec.kind, spec.name);
            return Ok((existing, Origin::Adopted));
        }

        log::info!("Creating {} '{}'", spec.kind, spec.name);
        let created = self.call(spec, || {
            self.provider.create(spec.kind, &spec.name, desired)
        })?;
        Ok((created, Origin::Created))
    }

    fn read(&self, spec: &ResourceSpec, desired: &Attributes) -> Result<Option<Attributes>> {
        self.call(spec, || {
            self.provider.read_by_name(spec.kind, &spec.name, desired)
        })
    }

    /// Run a provider call under the retry policy
    fn call<T>(
        &self,
        spec: &ResourceSpec,
        operation: impl FnMut() -> std::result::Result<T, ProviderError>,
    ) -> Result<T> {
        let callback = NodeRetry {
            node: &spec.id,
            progress: self.progress,
        };
        with_retry(&self.options.retry, Some(&callback), operation).map_err(|exhausted| {
            Error::Provider {
                node: spec.id.clone(),
                attempts: exhausted.attempts,
                source: exhausted.error,
            }
        })
    }

    fn derive_connection(
        &self,
        store: &ResourceStore,
        spec: &ResourceSpec,
        desired: Attributes,
    ) -> Result<(Attributes, Origin)> {
        let target = ConnectionTarget {
            host: required_str(spec, &desired, "host")?,
            user: desired
                .get("user")
                .and_then(Value::as_str)
                .unwrap_or("root")
                .to_string(),
            private_key: required_str(spec, &desired, "private_key")?,
        };

        let fresh = store.ancestors(&spec.id).iter().any(|ancestor| {
            ancestor.kind == Kind::Server
                && store
                    .resolved(&ancestor.id)
                    .is_some_and(|r| r.origin == Origin::Created)
        });
        let policy = if fresh {
            &self.options.readiness.fresh
        } else {
            &self.options.readiness.settled
        };

        if policy.timeout.is_zero() {
            log::debug!("Skipping readiness gate for {target}");
        } else {
            log::info!(
                "Waiting for {} (up to {}s{})",
                target,
                policy.timeout.as_secs(),
                if fresh { ", new server" } else { "" }
            );
            ReadinessGate::new(self.transport, self.cancel, self.progress).wait(&target, policy)?;
        }

        let mut attributes = Attributes::new();
        attributes.insert("host".into(), Value::Str(target.host));
        attributes.insert("user".into(), Value::Str(target.user));
        attributes.insert("private_key".into(), Value::Str(target.private_key));
        Ok((attributes, Origin::Derived))
    }
}

/// First attribute declared and observed with different values
///
/// Keys the provider does not report are not compared.
fn first_conflict<'a>(
    desired: &'a Attributes,
    observed: &'a Attributes,
) -> Option<(&'a str, &'a Value, &'a Value)> {
    desired.iter().find_map(|(key, wanted)| {
        if matches!(wanted, Value::Ref(_)) {
            return None;
        }
        observed
            .get(key)
            .filter(|found| *found != wanted)
            .map(|found| (key.as_str(), wanted, found))
    })
}

fn required_str(spec: &ResourceSpec, attributes: &Attributes, key: &str) -> Result<String> {
    attributes
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::UnresolvedAttribute {
            node: spec.id.clone(),
            reference: format!("{}.{key}", spec.id),
        })
}
