//! Dependency resolution: deterministic topological ordering of pending
//! tasks.
//!
//! The resolver is pure: it never touches the database. Given the registry,
//! the pending subset and the set of already-executed task names, it
//! produces a total order in which every dependency precedes its dependents.
//! Ties are broken by task name so the same inputs always yield the same
//! order. Cycles and unresolvable dependencies are fatal configuration
//! errors surfaced before any task runs.

use crate::core::error::{ConfigError, SchemupError};
use crate::core::task::TaskRegistry;
use std::collections::{BTreeMap, BTreeSet};

/// Order `pending` such that for every task all of its dependencies,
/// whether pending (ordered earlier) or already executed, precede it.
pub fn resolve_order(
    registry: &TaskRegistry,
    pending: &BTreeSet<String>,
    executed: &BTreeSet<String>,
) -> Result<Vec<String>, SchemupError> {
    // Edges between pending nodes only; executed dependencies are already
    // satisfied and contribute nothing to the order.
    let mut in_degree: BTreeMap<&str, usize> = pending.iter().map(|n| (n.as_str(), 0)).collect();
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

    for name in pending {
        let task = registry.get(name).ok_or_else(|| {
            SchemupError::Validation(format!("pending task '{name}' is not registered"))
        })?;
        for dep in &task.dependencies {
            if executed.contains(dep) {
                continue;
            }
            if !pending.contains(dep) {
                return Err(ConfigError::UnknownDependency {
                    task: name.clone(),
                    dependency: dep.clone(),
                }
                .into());
            }
            *in_degree.get_mut(name.as_str()).unwrap() += 1;
            dependents.entry(dep.as_str()).or_default().push(name.as_str());
        }
    }

    // Kahn's algorithm with a BTreeSet ready-queue: popping the smallest
    // name gives the deterministic tie-break.
    let mut ready: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(n, _)| *n)
        .collect();
    let mut order = Vec::with_capacity(pending.len());

    while let Some(name) = ready.pop_first() {
        order.push(name.to_string());
        if let Some(next) = dependents.get(name) {
            for &dependent in next {
                let degree = in_degree.get_mut(dependent).unwrap();
                *degree -= 1;
                if *degree == 0 {
                    ready.insert(dependent);
                }
            }
        }
    }

    if order.len() < pending.len() {
        let ordered: BTreeSet<&str> = order.iter().map(String::as_str).collect();
        let cycle: Vec<String> = pending
            .iter()
            .filter(|n| !ordered.contains(n.as_str()))
            .cloned()
            .collect();
        return Err(ConfigError::DependencyCycle(cycle).into());
    }

    Ok(order)
}
