// src/core/builder/topology_tree.rs

//! The topology tree the builder selects across: an ordered list of node
//! types from `root` down to the physical disk (`hdd`), each uncoupled
//! group's position in it (`units`), and the existing per-namespace
//! occupancy used to weight candidate combinations (spec §4.F).

use std::collections::HashMap;

/// The grouping levels between `root` and the leaf (`hdd`) the builder
/// diversifies across — typically just `dc`, but an inventory may expose
/// finer levels (`row`, `rack`). Supplied by the caller since it is
/// inventory-defined (spec §4.F: "`NODE_TYPES = ["root",
/// …inventory-defined node types…, "hdd"]`").
pub fn default_levels() -> Vec<String> {
    vec!["dc".to_string()]
}

/// For one uncoupled group, the unit name at each level in `levels`
/// order, derived by walking its host's parent chain. A level absent
/// from the chain maps to `"unknown"`.
pub fn compute_units(levels: &[String], host_parents: &[(String, String)]) -> Vec<String> {
    levels
        .iter()
        .map(|level| {
            host_parents
                .iter()
                .find(|(kind, _)| kind == level)
                .map(|(_, name)| name.clone())
                .unwrap_or_else(|| "unknown".to_string())
        })
        .collect()
}

/// Per-level occupancy accounting for a target namespace: how many
/// existing groups of that namespace already live under each unit, and
/// the average count per distinct unit at that level (spec §4.F:
/// "`account_ns_couples(tree, ns)`").
#[derive(Debug, Clone, Default)]
pub struct NsAccounting {
    pub existing_count: HashMap<(usize, String), usize>,
    pub level_avg: Vec<f64>,
}

impl NsAccounting {
    pub fn existing(&self, depth: usize, unit: &str) -> usize {
        self.existing_count
            .get(&(depth, unit.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn avg(&self, depth: usize) -> f64 {
        self.level_avg.get(depth).copied().unwrap_or(0.0)
    }
}

/// Builds a `NsAccounting` from the unit-paths of groups already
/// belonging to the target namespace.
pub fn account_ns_couples(levels: &[String], existing_group_units: &[Vec<String>]) -> NsAccounting {
    let mut existing_count: HashMap<(usize, String), usize> = HashMap::new();
    let mut level_avg = Vec::with_capacity(levels.len());

    for depth in 0..levels.len() {
        let mut distinct_units = std::collections::HashSet::new();
        for units in existing_group_units {
            if let Some(unit) = units.get(depth) {
                *existing_count.entry((depth, unit.clone())).or_insert(0) += 1;
                distinct_units.insert(unit.clone());
            }
        }
        let total: usize = distinct_units
            .iter()
            .map(|u| existing_count.get(&(depth, u.clone())).copied().unwrap_or(0))
            .sum();
        let avg = if distinct_units.is_empty() {
            0.0
        } else {
            total as f64 / distinct_units.len() as f64
        };
        level_avg.push(avg);
    }

    NsAccounting {
        existing_count,
        level_avg,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_units_falls_back_to_unknown() {
        let levels = vec!["dc".to_string(), "rack".to_string()];
        let parents = vec![("dc".to_string(), "dc1".to_string())];
        assert_eq!(compute_units(&levels, &parents), vec!["dc1", "unknown"]);
    }

    #[test]
    fn accounting_averages_across_distinct_units() {
        let levels = vec!["dc".to_string()];
        let existing = vec![
            vec!["a".to_string()],
            vec!["a".to_string()],
            vec!["b".to_string()],
        ];
        let acc = account_ns_couples(&levels, &existing);
        assert_eq!(acc.existing(0, "a"), 2);
        assert_eq!(acc.existing(0, "b"), 1);
        assert!((acc.avg(0) - 1.5).abs() < 1e-9);
    }
}
