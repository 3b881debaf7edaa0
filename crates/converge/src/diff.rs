//! Plan preview - what an apply would do, without side effects

use crate::context::Provider;
use crate::error::{Error, Result};
use crate::planner::{NodeId, Plan};
use crate::step::BootstrapStep;
use crate::store::ResourceStore;
use crate::types::{Attributes, Mode, ResourceSpec};
use serde::{Deserialize, Serialize};

/// What applying a node is expected to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlannedAction {
    /// Not present provider-side; will be created
    Create,
    /// Present provider-side; will be adopted
    Adopt,
    /// Create mode, provider state not checked
    Ensure,
    /// Lookup mode; the resource exists (or was not checked)
    Lookup,
    /// Lookup mode and the resource does not exist; apply will fail
    Missing,
    /// Computed from other resources
    Derive,
    /// Bootstrap step
    Run,
}

impl PlannedAction {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Create => "+",
            Self::Adopt => "=",
            Self::Ensure => "~",
            Self::Lookup => "<",
            Self::Missing => "!",
            Self::Derive => "-",
            Self::Run => ">",
        }
    }
}

/// One node of a previewed plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodePreview {
    pub node: NodeId,
    /// Index of the wave the node runs in
    pub wave: usize,
    pub action: PlannedAction,
    pub description: String,
}

/// Counts of planned actions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub create: usize,
    pub adopt: usize,
    pub ensure: usize,
    pub lookup: usize,
    pub missing: usize,
    pub derive: usize,
    pub run: usize,
}

impl DiffSummary {
    pub fn from_previews(previews: &[NodePreview]) -> Self {
        let mut summary = Self::default();
        for preview in previews {
            match preview.action {
                PlannedAction::Create => summary.create += 1,
                PlannedAction::Adopt => summary.adopt += 1,
                PlannedAction::Ensure => summary.ensure += 1,
                PlannedAction::Lookup => summary.lookup += 1,
                PlannedAction::Missing => summary.missing += 1,
                PlannedAction::Derive => summary.derive += 1,
                PlannedAction::Run => summary.run += 1,
            }
        }
        summary
    }

    /// Whether an apply is certain to fail on a missing lookup
    pub fn has_missing(&self) -> bool {
        self.missing > 0
    }
}

/// Preview a plan in execution order
///
/// With a provider, every non-derived resource is read by name (reads
/// only, no retries) to tell creates from adoptions. Attributes that
/// reference other resources are not available yet and are left out of
/// the lookup hints.
pub fn preview(
    plan: &Plan,
    store: &ResourceStore,
    steps: &[BootstrapStep],
    provider: Option<&dyn Provider>,
) -> Result<Vec<NodePreview>> {
    let mut previews = Vec::with_capacity(plan.len());

    for (wave, nodes) in plan.waves.iter().enumerate() {
        for node in nodes {
            let (action, description) = match node {
                NodeId::Resource(id) => {
                    let spec = store.spec(id).ok_or_else(|| Error::UnknownReference {
                        node: "plan".to_string(),
                        target: id.clone(),
                    })?;
                    (
                        resource_action(spec, provider)?,
                        format!("{} {}", spec.kind, spec.name),
                    )
                }
                NodeId::Step(name) => {
                    let step = steps
                        .iter()
                        .find(|s| &s.name == name)
                        .ok_or_else(|| Error::UnknownReference {
                            node: "plan".to_string(),
                            target: node.to_string(),
                        })?;
                    (PlannedAction::Run, step.description())
                }
            };
            previews.push(NodePreview {
                node: node.clone(),
                wave,
                action,
                description,
            });
        }
    }

    Ok(previews)
}

fn resource_action(spec: &ResourceSpec, provider: Option<&dyn Provider>) -> Result<PlannedAction> {
    if spec.kind.is_derived() {
        return Ok(PlannedAction::Derive);
    }
    let Some(provider) = provider else {
        return Ok(match spec.mode {
            Mode::Create => PlannedAction::Ensure,
            Mode::Lookup => PlannedAction::Lookup,
        });
    };

    let hints = literal_hints(&spec.desired);
    let exists = provider
        .read_by_name(spec.kind, &spec.name, &hints)
        .map_err(|source| Error::Provider {
            node: spec.id.clone(),
            attempts: 1,
            source,
        })?
        .is_some();
    log::debug!(
        "{} '{}' {}",
        spec.kind,
        spec.name,
        if exists { "exists" } else { "does not exist" }
    );

    Ok(match (spec.mode, exists) {
        (Mode::Create, true) => PlannedAction::Adopt,
        (Mode::Create, false) => PlannedAction::Create,
        (Mode::Lookup, true) => PlannedAction::Lookup,
        (Mode::Lookup, false) => PlannedAction::Missing,
    })
}

fn literal_hints(desired: &Attributes) -> Attributes {
    desired
        .iter()
        .filter(|(_, value)| value.references().is_empty())
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::build_plan;
    use crate::testing::MockProvider;
    use crate::types::{Kind, Value};

    fn store() -> ResourceStore {
        ResourceStore::from_specs([
            ResourceSpec::lookup(Kind::IpAddress, "ip4").named("prod-primary_ip-v4"),
            ResourceSpec::create(Kind::IpAddress, "ip6").named("prod-primary_ip-v6"),
            ResourceSpec::create(Kind::Server, "srv")
                .with("server_type", "cx11")
                .with("ipv4", Value::reference("ip4", "id")),
            ResourceSpec::create(Kind::Connection, "conn")
                .with("host", Value::reference("srv", "ipv6_address")),
        ])
        .unwrap()
    }

    #[test]
    fn test_preview_without_refresh() {
        let store = store();
        let steps = vec![BootstrapStep::run("install", "conn", ["docker-compose pull"])];
        let plan = build_plan(&store, &steps).unwrap();

        let previews = preview(&plan, &store, &steps, None).unwrap();
        let actions: Vec<_> = previews.iter().map(|p| p.action).collect();

        assert_eq!(
            actions,
            vec![
                PlannedAction::Lookup,
                PlannedAction::Ensure,
                PlannedAction::Ensure,
                PlannedAction::Derive,
                PlannedAction::Run,
            ]
        );
        assert_eq!(previews[4].wave, 3);
    }

    #[test]
    fn test_preview_with_refresh_is_read_only() {
        let store = store();
        let provider = MockProvider::new()
            .with_existing(Kind::IpAddress, "prod-primary_ip-v6", Attributes::new());
        let plan = build_plan(&store, &[]).unwrap();

        let previews = preview(&plan, &store, &[], Some(&provider)).unwrap();
        let summary = DiffSummary::from_previews(&previews);

        assert_eq!(summary.missing, 1);
        assert_eq!(summary.adopt, 1);
        assert_eq!(summary.create, 1);
        assert_eq!(summary.derive, 1);
        assert!(summary.has_missing());
        assert_eq!(provider.read_count(), 3);
        assert_eq!(provider.create_count(), 0);
    }

    #[test]
    fn test_literal_hints_drop_references() {
        let store = store();
        let hints = literal_hints(&store.spec("srv").unwrap().desired);
        assert_eq!(hints.len(), 1);
        assert!(hints.contains_key("server_type"));
    }
}
