use std::any::Any;
use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::artifact::{Artifact, ArtifactList};
use crate::cancel::CancellationToken;
use crate::error::Result;
use crate::pipeline::Processor;
use crate::unit::{Unit, UnitId};

/// Well-known ID of the [`ResolvedDependencies`] artifact.
pub const RESOLVED_DEPENDENCIES_ARTIFACT_ID: &str = "resolved_dependencies";

pub const DEPENDENCY_RESOLVER_PROCESSOR_NAME: &str = "dependency_resolver";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DependencyError {
    #[error("Unit '{unit}' depends on '{dependency}' which was not found")]
    UnresolvedDependency { unit: String, dependency: String },

    #[error("Circular dependency detected between units: {}", .0.join(", "))]
    CircularDependency(Vec<String>),
}

pub type DependencySet = HashSet<UnitId>;

/// Supplies the dependencies of the units it supports.
pub trait DependencyProvider: Send + Sync {
    fn supports(&self, unit: &Unit) -> bool;

    fn provide(&self, unit: &Unit) -> Result<Vec<UnitId>>;
}

#[derive(Debug, Clone)]
pub struct DependencyNode {
    pub unit: Unit,
    pub dependencies: DependencySet,
}

impl DependencyNode {
    pub fn new(unit: Unit, dependencies: impl IntoIterator<Item = UnitId>) -> Self {
        Self {
            unit,
            dependencies: dependencies.into_iter().collect(),
        }
    }

    pub fn id(&self) -> &UnitId {
        &self.unit.id
    }
}

/// Units in an order where every unit comes after the units it depends on.
#[derive(Debug, Clone, Default)]
pub struct ResolvedDependencies {
    units: Vec<Unit>,
}

impl ResolvedDependencies {
    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    pub fn into_units(self) -> Vec<Unit> {
        self.units
    }

    pub fn ids(&self) -> Vec<&UnitId> {
        self.units.iter().map(|unit| &unit.id).collect()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

impl Artifact for ResolvedDependencies {
    fn id(&self) -> String {
        RESOLVED_DEPENDENCIES_ARTIFACT_ID.to_string()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Builds one node per unit, asking the first provider that supports it.
/// Units no provider supports have no dependencies.
pub fn build_dependency_nodes(
    units: &[Unit],
    providers: &[Box<dyn DependencyProvider>],
) -> Result<Vec<DependencyNode>> {
    units
        .iter()
        .map(|unit| {
            let dependencies = match providers.iter().find(|p| p.supports(unit)) {
                Some(provider) => provider.provide(unit)?,
                None => Vec::new(),
            };
            Ok(DependencyNode::new(unit.clone(), dependencies))
        })
        .collect()
}

/// Resolves unit dependencies and returns units in execution order
pub fn resolve_dependencies(
    nodes: Vec<DependencyNode>,
) -> std::result::Result<ResolvedDependencies, DependencyError> {
    let mut units: HashMap<UnitId, Unit> = HashMap::new();
    let mut pending: HashMap<UnitId, DependencySet> = HashMap::new();
    // Input order, so that ties are resolved deterministically
    let mut order: Vec<UnitId> = Vec::new();

    for node in nodes {
        let id = node.unit.id.clone();
        if units.insert(id.clone(), node.unit).is_none() {
            order.push(id.clone());
        }
        pending.insert(id, node.dependencies);
    }

    let mut resolved = Vec::with_capacity(units.len());

    while !pending.is_empty() {
        let ready: Vec<UnitId> = order
            .iter()
            .filter(|id| pending.get(*id).is_some_and(|deps| deps.is_empty()))
            .cloned()
            .collect();

        if ready.is_empty() {
            return Err(diagnose_unresolvable(&order, &units, &pending));
        }

        for id in &ready {
            pending.remove(id);
            if let Some(unit) = units.get(id) {
                resolved.push(unit.clone());
            }
        }

        let done: HashSet<&UnitId> = ready.iter().collect();
        for deps in pending.values_mut() {
            deps.retain(|dep| !done.contains(dep));
        }
    }

    tracing::trace!("Resolved {} unit(s)", resolved.len());

    Ok(ResolvedDependencies { units: resolved })
}

// Missing targets take precedence over cycles.
fn diagnose_unresolvable(
    order: &[UnitId],
    units: &HashMap<UnitId, Unit>,
    pending: &HashMap<UnitId, DependencySet>,
) -> DependencyError {
    for id in order {
        let Some(deps) = pending.get(id) else {
            continue;
        };
        let mut deps: Vec<&UnitId> = deps.iter().collect();
        deps.sort();
        if let Some(missing) = deps.into_iter().find(|dep| !units.contains_key(*dep)) {
            return DependencyError::UnresolvedDependency {
                unit: id.to_string(),
                dependency: missing.to_string(),
            };
        }
    }

    let mut remaining: Vec<String> = pending.keys().map(|id| id.to_string()).collect();
    remaining.sort();
    DependencyError::CircularDependency(remaining)
}

/// Pipeline stage reordering units by their declared dependencies.
pub struct DependencyResolverProcessor {
    providers: Vec<Box<dyn DependencyProvider>>,
}

impl DependencyResolverProcessor {
    pub fn new(providers: Vec<Box<dyn DependencyProvider>>) -> Self {
        Self { providers }
    }
}

impl Processor for DependencyResolverProcessor {
    fn name(&self) -> &str {
        DEPENDENCY_RESOLVER_PROCESSOR_NAME
    }

    fn process(&self, ctx: &CancellationToken, units: &[Unit]) -> Result<ArtifactList> {
        ctx.check()?;

        let nodes = build_dependency_nodes(units, &self.providers)?;
        let resolved = resolve_dependencies(nodes)?;

        tracing::info!("Resolved dependencies of {} unit(s)", resolved.len());

        Ok(vec![std::sync::Arc::new(resolved)])
    }
}
