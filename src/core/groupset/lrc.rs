// src/core/groupset/lrc.rs

//! The LRC-8-2-2-v1 groupset: 12 groups (8 data + 2 local parities + 2
//! global parities) laid out across three DCs, and its status cascade
//! (spec §3, §4.D).
//!
//! The "bad data parts" and "index shard" tables are generated at init
//! from the scheme definition below, never hand-written (spec §9).

use crate::core::errors::StormResult;
use crate::core::group::ActiveJob;
use crate::core::groupset::{GroupsetCascadeCommon, Groupset, metas_agree};
use crate::core::metakey::GroupMeta;
use crate::core::status::{CascadeResult, GroupStatus, GroupsetStatus, run_cascade};
use std::collections::HashMap;

/// Data-part indices split into the two local groups, per the scheme's
/// fixed layout (spec §4.D).
pub const LOCAL_GROUP_0_DATA: [usize; 4] = [0, 1, 2, 3];
pub const LOCAL_GROUP_1_DATA: [usize; 4] = [4, 5, 6, 7];
pub const LOCAL_PARITIES: [usize; 2] = [8, 9];
pub const GLOBAL_PARITIES: [usize; 2] = [10, 11];

/// The four index shards: `{0,2,8}, {1,3,9}, {4,6,10}, {5,7,11}` (spec §4.D.3).
pub const INDEX_SHARDS: [[usize; 3]; 4] = [[0, 2, 8], [1, 3, 9], [4, 6, 10], [5, 7, 11]];

fn combinations(elements: &[usize], k: usize) -> Vec<Vec<usize>> {
    if k == 0 {
        return vec![Vec::new()];
    }
    if elements.len() < k {
        return Vec::new();
    }
    let mut out = Vec::new();
    for i in 0..=(elements.len() - k) {
        let head = elements[i];
        for mut rest in combinations(&elements[i + 1..], k - 1) {
            rest.insert(0, head);
            out.push(rest);
        }
    }
    out
}

/// Generates the set of 4-index patterns that LRC-8-2-2 cannot
/// reconstruct from, per the six part-loss shapes enumerated in spec
/// §4.D.2: (a) all 4 data of a local group, (b) 3 data + local parity,
/// (c) 3 data + one global, (d) 2 data + both globals, (e) 2 data +
/// local parity + one global, (f) 1 data + local parity + both globals.
pub fn generate_bad_data_parts_indices() -> std::collections::HashSet<Vec<usize>> {
    let mut set = std::collections::HashSet::new();
    let locals = [
        (LOCAL_GROUP_0_DATA.to_vec(), LOCAL_PARITIES[0]),
        (LOCAL_GROUP_1_DATA.to_vec(), LOCAL_PARITIES[1]),
    ];

    let mut insert = |mut combo: Vec<usize>| {
        combo.sort_unstable();
        set.insert(combo);
    };

    for (data, parity) in &locals {
        // (a) all 4 data parts of this local group.
        insert(data.clone());

        for combo3 in combinations(data, 3) {
            // (b) 3 data parts + its local parity.
            let mut v = combo3.clone();
            v.push(*parity);
            insert(v);

            // (c) 3 data parts + one global parity.
            for &g in &GLOBAL_PARITIES {
                let mut v = combo3.clone();
                v.push(g);
                insert(v);
            }
        }

        for combo2 in combinations(data, 2) {
            // (d) 2 data parts + both globals.
            let mut v = combo2.clone();
            v.extend_from_slice(&GLOBAL_PARITIES);
            insert(v);

            // (e) 2 data parts + its local parity + one global.
            for &g in &GLOBAL_PARITIES {
                let mut v = combo2.clone();
                v.push(*parity);
                v.push(g);
                insert(v);
            }
        }

        for combo1 in combinations(data, 1) {
            // (f) 1 data part + its local parity + both globals.
            let mut v = combo1.clone();
            v.push(*parity);
            v.extend_from_slice(&GLOBAL_PARITIES);
            insert(v);
        }
    }

    set
}

/// `is_data_partially_unavailable(U)` of spec §8: `|U|>4`, or `|U|==4`
/// and `U` is in the generated table.
pub fn is_data_partially_unavailable(unavailable: &[usize], table: &std::collections::HashSet<Vec<usize>>) -> bool {
    if unavailable.len() > 4 {
        return true;
    }
    if unavailable.len() == 4 {
        let mut sorted = unavailable.to_vec();
        sorted.sort_unstable();
        return table.contains(&sorted);
    }
    false
}

/// Returns the first index shard fully contained in `unavailable`, if any.
pub fn get_unavailable_index_shard(unavailable: &[usize]) -> Option<[usize; 3]> {
    let set: std::collections::HashSet<usize> = unavailable.iter().copied().collect();
    INDEX_SHARDS
        .into_iter()
        .find(|shard| shard.iter().all(|idx| set.contains(idx)))
}

fn escalate(base: GroupsetStatus, job: Option<&ActiveJob>) -> GroupsetStatus {
    match job {
        Some(job) if job.stalled => GroupsetStatus::ServiceStalled,
        Some(_) => GroupsetStatus::ServiceActive,
        None => base,
    }
}

#[derive(Debug, Clone)]
pub struct LrcGroupSummary {
    pub group_id: u64,
    pub index: usize,
    pub status: GroupStatus,
    pub meta: Option<GroupMeta>,
    pub active_job: Option<ActiveJob>,
    pub dc: String,
}

pub struct Lrc {
    pub id: String,
    /// Group ids in scheme order (index 0..12).
    pub group_ids: Vec<u64>,
    pub namespace: String,
    pub scheme: String,
    pub part_size: u64,
    pub settings: HashMap<String, String>,
}

pub struct LrcCascadeInput<'a> {
    pub groups: &'a [LrcGroupSummary],
    pub namespace_has_settings: bool,
    pub is_cache_namespace: bool,
    pub forbidden_dc_sharing_among_groups: bool,
    pub forbidden_ns_without_settings: bool,
    pub bad_data_parts_table: &'a std::collections::HashSet<Vec<usize>>,
}

pub fn lrc_status(lrc: &Lrc, input: &LrcCascadeInput) -> CascadeResult<GroupsetStatus> {
    let unavailable: Vec<usize> = {
        let mut v: Vec<usize> = input
            .groups
            .iter()
            .filter(|g| g.status != GroupStatus::Coupled)
            .map(|g| g.index)
            .collect();
        v.sort_unstable();
        v
    };

    let data_unavailable = || {
        if is_data_partially_unavailable(&unavailable, input.bad_data_parts_table) {
            Some(CascadeResult::new(
                GroupsetStatus::BadDataUnavailable,
                "LRC groupset has lost an unreconstructable set of data parts",
            ))
        } else {
            None
        }
    };

    let indices_unavailable = || {
        get_unavailable_index_shard(&unavailable).map(|shard| {
            CascadeResult::new(
                GroupsetStatus::BadIndicesUnavailable,
                format!("LRC groupset has lost index shard {shard:?}"),
            )
        })
    };

    let missing_meta = || {
        input.groups.iter().find(|g| g.meta.is_none()).map(|g| {
            CascadeResult::new(
                escalate(GroupsetStatus::Bad, g.active_job.as_ref()),
                format!("Group {} has no meta", g.group_id),
            )
        })
    };

    let namespace_mismatch = || {
        input
            .groups
            .iter()
            .find(|g| {
                g.meta
                    .as_ref()
                    .map(|m| m.namespace != lrc.namespace)
                    .unwrap_or(false)
            })
            .map(|g| {
                CascadeResult::new(
                    GroupsetStatus::Bad,
                    format!("Group {} has a mismatched namespace in its meta", g.group_id),
                )
            })
    };

    let meta_disagreement = || {
        let first = input.groups.first()?.meta.as_ref()?;
        input
            .groups
            .iter()
            .find(|g| g.meta.as_ref().map(|m| !metas_agree(first, m)).unwrap_or(false))
            .map(|g| {
                CascadeResult::new(
                    GroupsetStatus::Bad,
                    format!("Group {}'s meta disagrees with the groupset's other groups", g.group_id),
                )
            })
    };

    let frozen = || {
        if input
            .groups
            .iter()
            .any(|g| g.meta.as_ref().map(|m| m.frozen).unwrap_or(false))
        {
            Some(CascadeResult::new(
                GroupsetStatus::Frozen,
                format!("LRC groupset {} is frozen", lrc.id),
            ))
        } else {
            None
        }
    };

    let scheme_mismatch = || {
        input
            .groups
            .iter()
            .find(|g| {
                g.meta
                    .as_ref()
                    .and_then(|m| m.lrc.as_ref())
                    .map(|l| l.part_size != lrc.part_size || l.scheme != lrc.scheme)
                    .unwrap_or(true)
            })
            .map(|g| {
                CascadeResult::new(
                    GroupsetStatus::Broken,
                    format!("Group {} has a mismatched LRC scheme or part_size", g.group_id),
                )
            })
    };

    let settings_broken = || {
        let common = GroupsetCascadeCommon {
            namespace_has_settings: input.namespace_has_settings,
            is_cache_namespace: input.is_cache_namespace,
            group_dcs: input.groups.iter().map(|g| g.dc.as_str()).collect(),
            any_group_broken: input.groups.iter().any(|g| g.status == GroupStatus::Broken),
            forbidden_dc_sharing_among_groups: input.forbidden_dc_sharing_among_groups,
            forbidden_ns_without_settings: input.forbidden_ns_without_settings,
        };
        common
            .broken_reason()
            .map(|reason| CascadeResult::new(GroupsetStatus::Broken, reason))
    };

    let any_not_coupled = || {
        input
            .groups
            .iter()
            .find(|g| g.status != GroupStatus::Coupled)
            .map(|g| {
                CascadeResult::new(
                    escalate(GroupsetStatus::Bad, g.active_job.as_ref()),
                    format!("Group {} is not in state COUPLED", g.group_id),
                )
            })
    };

    let predicates: Vec<&dyn Fn() -> Option<CascadeResult<GroupsetStatus>>> = vec![
        &data_unavailable,
        &indices_unavailable,
        &missing_meta,
        &namespace_mismatch,
        &meta_disagreement,
        &frozen,
        &scheme_mismatch,
        &settings_broken,
        &any_not_coupled,
    ];

    run_cascade(
        &predicates,
        CascadeResult::new(GroupsetStatus::Archived, "LRC groupset is fully coupled (archived)"),
    )
}

impl Groupset for Lrc {
    fn groupset_id(&self) -> &str {
        &self.id
    }

    fn update_status(&self) -> crate::core::status::GroupsetCascadeResult {
        CascadeResult::new(GroupsetStatus::Init, "unresolved: call lrc_status")
    }

    fn compose_group_meta(&self, frozen: bool) -> HashMap<u64, GroupMeta> {
        self.group_ids
            .iter()
            .map(|&gid| {
                let mut meta = GroupMeta::data(self.group_ids.clone(), self.namespace.clone(), frozen);
                meta.group_type = Some("lrc-8-2-2-v1".to_string());
                meta.lrc = Some(crate::core::metakey::LrcLink {
                    groups: self.group_ids.clone(),
                    part_size: self.part_size,
                    scheme: self.scheme.clone(),
                });
                (gid, meta)
            })
            .collect()
    }

    fn group_ids(&self) -> Vec<u64> {
        self.group_ids.clone()
    }

    fn check_groups(&self) -> StormResult<()> {
        if self.group_ids.len() != 12 {
            return Err(crate::core::errors::StormError::validation(
                "LRC-8-2-2-v1 groupset must have exactly 12 groups",
            ));
        }
        Ok(())
    }

    fn check_settings(&self) -> StormResult<()> {
        Ok(())
    }

    fn groupset_settings(&self) -> &HashMap<String, String> {
        &self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_four_data_of_a_local_group_is_unavailable() {
        let table = generate_bad_data_parts_indices();
        assert!(is_data_partially_unavailable(&[0, 1, 2, 3], &table));
    }

    #[test]
    fn two_data_from_each_local_is_not_unavailable() {
        let table = generate_bad_data_parts_indices();
        assert!(!is_data_partially_unavailable(&[0, 1, 4, 5], &table));
    }

    #[test]
    fn three_data_plus_local_parity_is_unavailable() {
        let table = generate_bad_data_parts_indices();
        assert!(is_data_partially_unavailable(&[0, 1, 2, 8], &table));
    }

    #[test]
    fn two_data_plus_both_globals_is_unavailable() {
        let table = generate_bad_data_parts_indices();
        assert!(is_data_partially_unavailable(&[0, 1, 10, 11], &table));
    }

    #[test]
    fn more_than_four_unavailable_is_always_unavailable() {
        let table = generate_bad_data_parts_indices();
        assert!(is_data_partially_unavailable(&[0, 1, 2, 3, 4], &table));
    }

    #[test]
    fn index_shard_requires_full_containment() {
        assert_eq!(get_unavailable_index_shard(&[0, 1, 2]), None);
        assert_eq!(get_unavailable_index_shard(&[0, 2, 8]), Some([0, 2, 8]));
    }

    #[test]
    fn table_generation_is_deterministic_and_nonempty() {
        let a = generate_bad_data_parts_indices();
        let b = generate_bad_data_parts_indices();
        assert_eq!(a, b);
        assert!(a.len() > 10);
    }
}
