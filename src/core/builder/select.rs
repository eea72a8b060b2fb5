// src/core/builder/select.rs

//! The recursive, weight-minimizing topological selection algorithm
//! (spec §4.F: `__choose_groups`): descends the node-type tree one level
//! at a time, at each level enumerating combinations of "how many groups
//! to take from each unit" and picking the least-weight combination,
//! then recurses into the chosen units.

use crate::core::builder::topology_tree::NsAccounting;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
pub struct UncoupledCandidate {
    pub group_id: u64,
    pub total_space: u64,
    /// Unit name per level, in the same order as the `levels` passed to
    /// `choose_groups`.
    pub units: Vec<String>,
}

fn combinations<T: Clone>(elements: &[T], k: usize) -> Vec<Vec<T>> {
    if k == 0 {
        return vec![Vec::new()];
    }
    if elements.len() < k {
        return Vec::new();
    }
    let mut out = Vec::new();
    for i in 0..=(elements.len() - k) {
        let head = elements[i].clone();
        for mut rest in combinations(&elements[i + 1..], k - 1) {
            rest.insert(0, head.clone());
            out.push(rest);
        }
    }
    out
}

/// Enumerates every distinct (as a multiset) combination of size `k`
/// drawn from `choice_list`, which may contain repeated values (a unit
/// repeated `min(remaining, |candidates|)` times, per spec §4.F).
fn multiset_combinations(choice_list: &[String], k: usize) -> Vec<Vec<String>> {
    let index_combos = combinations(&(0..choice_list.len()).collect::<Vec<_>>(), k);
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for idxs in index_combos {
        let mut values: Vec<String> = idxs.iter().map(|&i| choice_list[i].clone()).collect();
        values.sort_unstable();
        if seen.insert(values.clone()) {
            out.push(values);
        }
    }
    out
}

/// Recursively selects `remaining` groups from `candidates`, descending
/// `levels` one at a time. Returns the chosen group ids and the total
/// weight of the selection, or `None` if no valid combination exists
/// (e.g. `mandatory` groups can't all be represented, or the DC-sharing
/// policy can't be satisfied).
#[allow(clippy::too_many_arguments)]
pub fn choose_groups(
    candidates: &[UncoupledCandidate],
    remaining: usize,
    depth: usize,
    levels: &[String],
    mandatory: &HashSet<u64>,
    accounting: &NsAccounting,
    forbidden_dc_sharing_among_groups: bool,
    dc_depth: usize,
    used_dcs: &HashSet<String>,
) -> Option<(Vec<u64>, f64)> {
    if remaining == 0 {
        return Some((Vec::new(), 0.0));
    }

    if depth == levels.len() {
        // Leaf: `candidates` is already narrowed to one unit path at
        // every level. Prefer any mandatory groups, then fill by
        // whatever free candidates remain.
        if candidates.len() < remaining {
            return None;
        }
        let mut chosen = Vec::new();
        for c in candidates.iter().filter(|c| mandatory.contains(&c.group_id)) {
            chosen.push(c.group_id);
        }
        for c in candidates {
            if chosen.len() >= remaining {
                break;
            }
            if !chosen.contains(&c.group_id) {
                chosen.push(c.group_id);
            }
        }
        if chosen.len() != remaining {
            return None;
        }
        return Some((chosen, 0.0));
    }

    let mut groups: HashMap<String, Vec<&UncoupledCandidate>> = HashMap::new();
    for c in candidates {
        groups.entry(c.units[depth].clone()).or_default().push(c);
    }

    let mandatory_units_here: HashSet<String> = candidates
        .iter()
        .filter(|c| mandatory.contains(&c.group_id))
        .map(|c| c.units[depth].clone())
        .collect();

    let mut choice_list = Vec::new();
    for (unit, members) in &groups {
        let reps = remaining.min(members.len());
        for _ in 0..reps {
            choice_list.push(unit.clone());
        }
    }

    let mut best: Option<(Vec<u64>, f64)> = None;
    for combo in multiset_combinations(&choice_list, remaining) {
        if !mandatory_units_here.iter().all(|u| combo.contains(u)) {
            continue;
        }

        let mut counts: HashMap<String, usize> = HashMap::new();
        for u in &combo {
            *counts.entry(u.clone()).or_insert(0) += 1;
        }

        if forbidden_dc_sharing_among_groups && depth == dc_depth {
            let any_used_twice = counts.values().any(|&c| c > 1);
            let reuses_existing_dc = counts.keys().any(|u| used_dcs.contains(u));
            if any_used_twice || reuses_existing_dc {
                continue;
            }
        }

        let weight: f64 = counts
            .iter()
            .map(|(unit, &count)| {
                let avg = accounting.avg(depth);
                let existing = accounting.existing(depth, unit) as f64;
                (existing + count as f64 - avg).powi(2)
            })
            .sum();

        let mut chosen_ids = Vec::new();
        let mut total_weight = weight;
        let mut ok = true;
        let mut child_used_dcs = used_dcs.clone();

        for (unit, count) in &counts {
            if depth == dc_depth {
                child_used_dcs.insert(unit.clone());
            }
            let sub_candidates: Vec<UncoupledCandidate> =
                groups[unit].iter().map(|c| (*c).clone()).collect();
            let sub_mandatory: HashSet<u64> = mandatory
                .iter()
                .copied()
                .filter(|id| sub_candidates.iter().any(|c| c.group_id == *id))
                .collect();

            match choose_groups(
                &sub_candidates,
                *count,
                depth + 1,
                levels,
                &sub_mandatory,
                accounting,
                forbidden_dc_sharing_among_groups,
                dc_depth,
                &child_used_dcs,
            ) {
                Some((ids, w)) => {
                    chosen_ids.extend(ids);
                    total_weight += w;
                }
                None => {
                    ok = false;
                    break;
                }
            }
        }

        if !ok {
            continue;
        }
        if best.as_ref().map(|(_, bw)| total_weight < *bw).unwrap_or(true) {
            best = Some((chosen_ids, total_weight));
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(gid: u64, dc: &str) -> UncoupledCandidate {
        UncoupledCandidate {
            group_id: gid,
            total_space: 100,
            units: vec![dc.to_string()],
        }
    }

    #[test]
    fn picks_one_group_per_distinct_dc() {
        let candidates = vec![
            candidate(101, "a"),
            candidate(102, "b"),
            candidate(103, "c"),
            candidate(104, "a"),
        ];
        let accounting = NsAccounting::default();
        let (chosen, _) = choose_groups(
            &candidates,
            3,
            0,
            &["dc".to_string()],
            &HashSet::new(),
            &accounting,
            true,
            0,
            &HashSet::new(),
        )
        .unwrap();

        let dcs: HashSet<&str> = chosen
            .iter()
            .map(|gid| candidates.iter().find(|c| c.group_id == *gid).unwrap().units[0].as_str())
            .collect();
        assert_eq!(chosen.len(), 3);
        assert_eq!(dcs.len(), 3);
    }

    #[test]
    fn mandatory_groups_forcing_dc_collision_fails_under_policy() {
        let candidates = vec![
            candidate(101, "a"),
            candidate(102, "b"),
            candidate(103, "c"),
            candidate(104, "a"),
        ];
        let mandatory: HashSet<u64> = [101, 104].into_iter().collect();
        let accounting = NsAccounting::default();
        let result = choose_groups(
            &candidates,
            3,
            0,
            &["dc".to_string()],
            &mandatory,
            &accounting,
            true,
            0,
            &HashSet::new(),
        );
        assert!(result.is_none());
    }
}
