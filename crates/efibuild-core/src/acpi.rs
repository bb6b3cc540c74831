//! ACPI table load ordering.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use indexmap::IndexMap;
use tracing::debug;

use crate::error::{Error, Result};
use crate::graph::toposort;
use crate::parsers::acpi::{AcpiNamespace, scan};

/// The platform's primary table, always assumed present.
pub const DSDT: &str = "DSDT";

/// Marks symbol nodes so they never collide with table names.
const SYMBOL_MARK: char = '\\';

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcpiOrder {
    /// Table names in load order.
    pub order: Vec<String>,
    /// Table -> symbols attributed to it, DSDT first. Symbols nobody
    /// exports land in the DSDT bucket.
    pub buckets: IndexMap<String, Vec<String>>,
}

/// Root symbols before nested ones.
fn symbol_key(symbol: &str) -> (usize, &str) {
    (symbol.matches('.').count(), symbol)
}

fn sorted_symbols<'a>(symbols: impl IntoIterator<Item = &'a String>) -> Vec<String> {
    let mut out: Vec<&String> = symbols.into_iter().collect();
    out.sort_by(|a, b| symbol_key(a).cmp(&symbol_key(b)));
    out.dedup();
    out.into_iter().cloned().collect()
}

/// Scan every source in `sources` (table name -> `.dsl` path).
pub fn scan_tables(sources: &BTreeMap<String, std::path::PathBuf>) -> Result<BTreeMap<String, AcpiNamespace>> {
    sources
        .iter()
        .map(|(name, path)| Ok((name.clone(), scan_file(path)?)))
        .collect()
}

pub fn scan_file(path: &Path) -> Result<AcpiNamespace> {
    let text = std::fs::read_to_string(path)?;
    Ok(scan(&text)?)
}

/// Load order over `tables` such that every table follows the tables
/// exporting the symbols it imports.
///
/// # Errors
///
/// [`Error::DependencyCycle`] when tables import from each other.
pub fn sort_tables(tables: &BTreeMap<String, AcpiNamespace>) -> Result<AcpiOrder> {
    let mut exporter: BTreeMap<&str, &str> = BTreeMap::new();
    for (table, ns) in tables {
        for symbol in ns.statements.keys() {
            exporter.entry(symbol.as_str()).or_insert(table.as_str());
        }
    }

    let mut deps: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut referenced: BTreeSet<&String> = BTreeSet::new();
    for (table, ns) in tables {
        for symbol in ns.imports.keys() {
            let node = format!("{SYMBOL_MARK}{symbol}");
            deps.entry(table.clone()).or_default().insert(node.clone());
            if let Some(owner) = exporter.get(symbol.as_str()).filter(|o| **o != table.as_str()) {
                deps.entry(node).or_default().insert((*owner).to_string());
            }
            referenced.insert(symbol);
        }
    }

    let mut nodes: Vec<String> = tables.keys().cloned().collect();
    nodes.extend(
        sorted_symbols(referenced.iter().copied())
            .into_iter()
            .map(|s| format!("{SYMBOL_MARK}{s}")),
    );

    let sorted = toposort(&nodes, &deps).map_err(|e| match e {
        Error::DependencyCycle { participants } => Error::DependencyCycle {
            participants: participants
                .into_iter()
                .map(|p| p.trim_start_matches(SYMBOL_MARK).to_string())
                .collect(),
        },
        other => other,
    })?;

    let mut result = AcpiOrder::default();
    result.buckets.insert(DSDT.to_string(), Vec::new());
    let mut unresolved = Vec::new();

    for node in sorted {
        if let Some(symbol) = node.strip_prefix(SYMBOL_MARK) {
            // Imports some table provides are already in that table's bucket
            if !exporter.contains_key(symbol) {
                unresolved.push(symbol.to_string());
            }
            continue;
        }
        let exports = sorted_symbols(tables[&node].statements.keys());
        if node == DSDT {
            unresolved.extend(exports);
            continue;
        }
        result.order.push(node.clone());
        result.buckets.insert(node, exports);
    }

    let dsdt = sorted_symbols(unresolved.iter());
    debug!(unresolved = dsdt.len(), "attributed symbols to DSDT");
    result.buckets.insert(DSDT.to_string(), dsdt);
    Ok(result)
}
