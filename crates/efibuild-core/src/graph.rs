//! Topological sorting shared by the kext and ACPI ordering passes.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::{Error, Result};

/// Order `nodes` so every node follows its dependencies.
///
/// `deps[n]` lists the nodes `n` depends on. Nodes are released in waves:
/// each wave holds every node whose dependencies have all been emitted,
/// in the order `nodes` lists them. Dependencies missing from `nodes` are
/// ignored.
///
/// # Errors
///
/// [`Error::DependencyCycle`] naming the nodes that could not be placed.
pub fn toposort(nodes: &[String], deps: &BTreeMap<String, BTreeSet<String>>) -> Result<Vec<String>> {
    let position: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.as_str(), i))
        .collect();

    let mut remaining: Vec<usize> = vec![0; nodes.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    for (i, node) in nodes.iter().enumerate() {
        for dep in deps.get(node).into_iter().flatten() {
            if let Some(&j) = position.get(dep.as_str()) {
                if j != i {
                    remaining[i] += 1;
                    dependents[j].push(i);
                }
            }
        }
    }

    let mut order = Vec::with_capacity(nodes.len());
    let mut emitted = vec![false; nodes.len()];
    let mut wave: Vec<usize> = (0..nodes.len()).filter(|&i| remaining[i] == 0).collect();

    while !wave.is_empty() {
        let mut next = Vec::new();
        for &i in &wave {
            emitted[i] = true;
            order.push(nodes[i].clone());
            for &d in &dependents[i] {
                remaining[d] -= 1;
                if remaining[d] == 0 {
                    next.push(d);
                }
            }
        }
        next.sort_unstable();
        next.dedup();
        wave = next;
    }

    if order.len() < nodes.len() {
        let mut participants: Vec<String> = nodes
            .iter()
            .zip(&emitted)
            .filter(|(_, done)| !**done)
            .map(|(n, _)| n.clone())
            .collect();
        participants.sort();
        return Err(Error::DependencyCycle { participants });
    }
    Ok(order)
}
