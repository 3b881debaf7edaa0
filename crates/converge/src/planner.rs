//! Dependency graph builder - orders resources and bootstrap steps
//!
//! Edges come from references in desired attributes, explicit
//! `depends_on` lists, and each step's connection. The order is a stable
//! topological sort: among nodes whose dependencies are satisfied, the one
//! declared first goes first, with resources declared before steps.

use crate::error::{Error, Result};
use crate::step::BootstrapStep;
use crate::store::ResourceStore;
use crate::types::Kind;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// A node in the execution plan
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum NodeId {
    Resource(String),
    Step(String),
}

impl NodeId {
    pub fn id(&self) -> &str {
        match self {
            Self::Resource(id) | Self::Step(id) => id,
        }
    }

    pub fn is_step(&self) -> bool {
        matches!(self, Self::Step(_))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resource(id) => write!(f, "{id}"),
            Self::Step(name) => write!(f, "step:{name}"),
        }
    }
}

/// An ordered execution plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Every node, dependencies first
    pub order: Vec<NodeId>,
    /// Groups of mutually independent nodes; wave n only depends on waves before it
    pub waves: Vec<Vec<NodeId>>,
    /// (from, to): `to` needs `from`
    pub edges: Vec<(NodeId, NodeId)>,
}

impl Plan {
    /// Position of a node in `order`
    pub fn index_of(&self, node: &NodeId) -> Option<usize> {
        self.order.iter().position(|n| n == node)
    }

    /// Direct dependencies of a node
    pub fn dependencies_of<'a>(&'a self, node: &'a NodeId) -> impl Iterator<Item = &'a NodeId> {
        self.edges
            .iter()
            .filter(move |(_, to)| to == node)
            .map(|(from, _)| from)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn step_count(&self) -> usize {
        self.order.iter().filter(|n| n.is_step()).count()
    }
}

/// Build a plan for the declared resources and steps
///
/// Fails before any side effect on cycles, unknown or forward references,
/// duplicate step names, and steps bound to non-connection resources.
pub fn build_plan(store: &ResourceStore, steps: &[BootstrapStep]) -> Result<Plan> {
    let mut nodes: Vec<NodeId> = store
        .specs()
        .iter()
        .map(|s| NodeId::Resource(s.id.clone()))
        .collect();
    let mut step_index: HashMap<&str, usize> = HashMap::new();
    for step in steps {
        if step_index.contains_key(step.name.as_str()) || store.contains(&step.name) {
            return Err(Error::DuplicateNode(step.name.clone()));
        }
        step_index.insert(step.name.as_str(), nodes.len());
        nodes.push(NodeId::Step(step.name.clone()));
    }

    // deps[i] holds node indices that node i waits for
    let mut deps: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];

    for (i, spec) in store.specs().iter().enumerate() {
        for dep in spec.dependencies() {
            let j = store.position(dep).ok_or_else(|| Error::UnknownReference {
                node: spec.id.clone(),
                target: dep.to_string(),
            })?;
            push_unique(&mut deps[i], j);
        }
    }

    for step in steps {
        let i = step_index[step.name.as_str()];
        match store.position(&step.connection) {
            Some(j) if store.specs()[j].kind == Kind::Connection => push_unique(&mut deps[i], j),
            Some(_) => {
                return Err(Error::InvalidConnection {
                    step: step.name.clone(),
                    resource: step.connection.clone(),
                });
            }
            None => {
                return Err(Error::UnknownReference {
                    node: format!("step:{}", step.name),
                    target: step.connection.clone(),
                });
            }
        }

        for dep in &step.depends_on {
            if let Some(j) = store.position(dep) {
                push_unique(&mut deps[i], j);
                continue;
            }
            match step_index.get(dep.as_str()) {
                Some(&j) if j < i => push_unique(&mut deps[i], j),
                Some(_) => {
                    return Err(Error::ForwardReference {
                        step: step.name.clone(),
                        target: dep.clone(),
                    });
                }
                None => {
                    return Err(Error::UnknownReference {
                        node: format!("step:{}", step.name),
                        target: dep.clone(),
                    });
                }
            }
        }
    }

    let (order, levels) = topological_order(&deps).map_err(|remaining| Error::CycleDetected {
        nodes: remaining.iter().map(|&i| nodes[i].to_string()).collect(),
    })?;

    let wave_count = levels.iter().copied().max().map_or(0, |m| m + 1);
    let mut waves: Vec<Vec<NodeId>> = vec![Vec::new(); wave_count];
    for &i in &order {
        waves[levels[i]].push(nodes[i].clone());
    }

    let edges = deps
        .iter()
        .enumerate()
        .flat_map(|(to, froms)| froms.iter().map(move |&from| (from, to)))
        .map(|(from, to)| (nodes[from].clone(), nodes[to].clone()))
        .collect();

    let plan = Plan {
        order: order.into_iter().map(|i| nodes[i].clone()).collect(),
        waves,
        edges,
    };
    log::debug!(
        "Planned {} nodes in {} waves",
        plan.order.len(),
        plan.waves.len()
    );
    Ok(plan)
}

fn push_unique(v: &mut Vec<usize>, value: usize) {
    if !v.contains(&value) {
        v.push(value);
    }
}

/// Kahn's algorithm with a declaration-order tie-break
///
/// Returns the order and each node's wave level, or the indices that
/// could not be ordered.
fn topological_order(deps: &[Vec<usize>]) -> std::result::Result<(Vec<usize>, Vec<usize>), Vec<usize>> {
    let n = deps.len();
    let mut pending: Vec<usize> = deps.iter().map(Vec::len).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (to, froms) in deps.iter().enumerate() {
        for &from in froms {
            dependents[from].push(to);
        }
    }

    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| pending[i] == 0).collect();
    let mut order = Vec::with_capacity(n);
    let mut levels = vec![0usize; n];

    while let Some(i) = ready.pop_first() {
        order.push(i);
        for &next in &dependents[i] {
            levels[next] = levels[next].max(levels[i] + 1);
            pending[next] -= 1;
            if pending[next] == 0 {
                ready.insert(next);
            }
        }
    }

    if order.len() < n {
        let remaining = (0..n).filter(|&i| pending[i] > 0).collect();
        return Err(remaining);
    }
    Ok((order, levels))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ResourceSpec, Value};

    fn scenario_store() -> ResourceStore {
        ResourceStore::from_specs([
            ResourceSpec::create(Kind::IpAddress, "ip"),
            ResourceSpec::create(Kind::Server, "srv").with("ipv6", Value::reference("ip", "id")),
            ResourceSpec::create(Kind::Connection, "conn")
                .with("host", Value::reference("srv", "ipv6_address")),
        ])
        .unwrap()
    }

    fn scenario_steps() -> Vec<BootstrapStep> {
        vec![
            BootstrapStep::copy_file("copy", "conn", "compose", b"x".to_vec(), "compose.yml"),
            BootstrapStep::run("login", "conn", ["docker login"]),
            BootstrapStep::run("install", "conn", ["docker-compose pull"]).after(["login", "copy"]),
        ]
    }

    fn assert_edges_respected(plan: &Plan) {
        for (from, to) in &plan.edges {
            assert!(
                plan.index_of(from).unwrap() < plan.index_of(to).unwrap(),
                "{from} must precede {to}"
            );
        }
    }

    #[test]
    fn test_scenario_order() {
        let plan = build_plan(&scenario_store(), &scenario_steps()).unwrap();
        let order: Vec<String> = plan.order.iter().map(ToString::to_string).collect();
        assert_eq!(
            order,
            vec![
                "ip",
                "srv",
                "conn",
                "step:copy",
                "step:login",
                "step:install"
            ]
        );
        assert_edges_respected(&plan);

        assert_eq!(plan.waves.len(), 5);
        assert_eq!(
            plan.waves[3],
            vec![NodeId::Step("copy".into()), NodeId::Step("login".into())]
        );
        assert_eq!(plan.step_count(), 3);
    }

    #[test]
    fn test_declaration_order_breaks_ties() {
        let store = ResourceStore::from_specs([
            ResourceSpec::create(Kind::Server, "srv")
                .with("a", Value::reference("b_ip", "id"))
                .with("b", Value::reference("a_ip", "id")),
            ResourceSpec::create(Kind::IpAddress, "b_ip"),
            ResourceSpec::create(Kind::IpAddress, "a_ip"),
            ResourceSpec::lookup(Kind::Image, "img"),
        ])
        .unwrap();

        let plan = build_plan(&store, &[]).unwrap();
        let order: Vec<&str> = plan.order.iter().map(NodeId::id).collect();
        assert_eq!(order, vec!["b_ip", "a_ip", "srv", "img"]);
        assert_edges_respected(&plan);

        // Deterministic across builds
        let again = build_plan(&store, &[]).unwrap();
        assert_eq!(plan.order, again.order);
    }

    #[test]
    fn test_edges_respected_for_wide_graph() {
        let mut specs = vec![ResourceSpec::create(Kind::IpAddress, "root")];
        for i in 0..8 {
            let parent = if i % 2 == 0 {
                "root".to_string()
            } else {
                format!("n{}", i - 1)
            };
            specs.push(
                ResourceSpec::create(Kind::Server, format!("n{i}"))
                    .with("parent", Value::reference(parent, "id")),
            );
        }
        specs.reverse();
        let store = ResourceStore::from_specs(specs).unwrap();
        let plan = build_plan(&store, &[]).unwrap();
        assert_eq!(plan.len(), 9);
        assert_edges_respected(&plan);
    }

    #[test]
    fn test_cycle_detected() {
        let store = ResourceStore::from_specs([
            ResourceSpec::create(Kind::IpAddress, "free"),
            ResourceSpec::create(Kind::Server, "a").with("x", Value::reference("b", "id")),
            ResourceSpec::create(Kind::Server, "b").after(["a"]),
        ])
        .unwrap();

        let err = build_plan(&store, &[]).unwrap_err();
        match err {
            Error::CycleDetected { nodes } => assert_eq!(nodes, vec!["a", "b"]),
            other => panic!("expected CycleDetected, got {other:?}"),
        }
    }

    #[test]
    fn test_self_reference_is_cycle() {
        let store = ResourceStore::from_specs([
            ResourceSpec::create(Kind::Server, "a").with("x", Value::reference("a", "id"))
        ])
        .unwrap();
        assert!(matches!(
            build_plan(&store, &[]),
            Err(Error::CycleDetected { .. })
        ));
    }

    #[test]
    fn test_unknown_reference() {
        let store = ResourceStore::from_specs([
            ResourceSpec::create(Kind::Server, "a").with("x", Value::reference("ghost", "id"))
        ])
        .unwrap();
        assert!(matches!(
            build_plan(&store, &[]),
            Err(Error::UnknownReference { target, .. }) if target == "ghost"
        ));
    }

    #[test]
    fn test_forward_step_reference_rejected() {
        let steps = vec![
            BootstrapStep::run("first", "conn", ["true"]).after(["second"]),
            BootstrapStep::run("second", "conn", ["true"]),
        ];
        assert!(matches!(
            build_plan(&scenario_store(), &steps),
            Err(Error::ForwardReference { step, target }) if step == "first" && target == "second"
        ));

        let steps = vec![BootstrapStep::run("loop", "conn", ["true"]).after(["loop"])];
        assert!(matches!(
            build_plan(&scenario_store(), &steps),
            Err(Error::ForwardReference { .. })
        ));
    }

    #[test]
    fn test_step_may_depend_on_resource() {
        let steps = vec![BootstrapStep::run("s", "conn", ["true"]).after(["ip"])];
        let plan = build_plan(&scenario_store(), &steps).unwrap();
        assert!(
            plan.dependencies_of(&NodeId::Step("s".into()))
                .any(|n| n == &NodeId::Resource("ip".into()))
        );
    }

    #[test]
    fn test_step_connection_must_be_connection_kind() {
        let steps = vec![BootstrapStep::run("s", "srv", ["true"])];
        assert!(matches!(
            build_plan(&scenario_store(), &steps),
            Err(Error::InvalidConnection { .. })
        ));

        let steps = vec![BootstrapStep::run("s", "nowhere", ["true"])];
        assert!(matches!(
            build_plan(&scenario_store(), &steps),
            Err(Error::UnknownReference { .. })
        ));
    }

    #[test]
    fn test_duplicate_step_name() {
        let steps = vec![
            BootstrapStep::run("s", "conn", ["true"]),
            BootstrapStep::run("s", "conn", ["false"]),
        ];
        assert!(matches!(
            build_plan(&scenario_store(), &steps),
            Err(Error::DuplicateNode(name)) if name == "s"
        ));
    }
}
