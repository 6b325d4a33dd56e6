//! Dependency ordering for table creation.
//!
//! Tables are emitted in rounds: each round takes every remaining table whose
//! in-scope dependencies have all been emitted already. When a round finds
//! nothing (a foreign-key cycle), the first remaining table in input order is
//! forced out so the ordering always covers every input exactly once.

use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreationOrder {
    pub tables: Vec<String>,
    /// Tables emitted to break a cycle, in the order they were forced.
    pub forced: Vec<String>,
}

impl CreationOrder {
    pub fn cycle_detected(&self) -> bool {
        !self.forced.is_empty()
    }
}

/// Orders `tables` so that each appears after the tables it references.
///
/// `dependencies` maps a table to the tables it references; references to
/// tables outside `tables` (and self-references) are ignored.
pub fn order(tables: &[String], dependencies: &HashMap<String, HashSet<String>>) -> CreationOrder {
    let mut remaining: Vec<&String> = Vec::new();
    let mut seen = HashSet::new();
    for table in tables {
        if seen.insert(table.as_str()) {
            remaining.push(table);
        }
    }

    let mut result = CreationOrder::default();

    while !remaining.is_empty() {
        let pending: HashSet<&str> = remaining.iter().map(|t| t.as_str()).collect();
        let ready: Vec<&String> = remaining
            .iter()
            .copied()
            .filter(|table| {
                dependencies.get(table.as_str()).map_or(true, |deps| {
                    deps.iter()
                        .all(|dep| dep == *table || !pending.contains(dep.as_str()))
                })
            })
            .collect();

        let emitted = if ready.is_empty() {
            let forced = remaining[0];
            result.forced.push(forced.clone());
            vec![forced]
        } else {
            ready
        };

        for table in &emitted {
            result.tables.push((*table).clone());
        }
        remaining.retain(|t| !emitted.contains(t));
    }

    result
}
