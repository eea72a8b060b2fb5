// src/core/groupset/replicas.rs

//! The replicas groupset (Couple): K mirrored groups, optionally paired
//! with a sibling LRC groupset of the same logical identity (spec §3,
//! §4.D).

use crate::core::errors::StormResult;
use crate::core::group::ActiveJob;
use crate::core::groupset::{GroupsetCascadeCommon, Groupset, metas_agree};
use crate::core::metakey::GroupMeta;
use crate::core::status::{CascadeResult, GroupStatus, GroupsetStatus, run_cascade};
use std::collections::HashMap;

/// Per-group facts the cascade needs, gathered by the caller from the
/// root state (spec §9: no intra-entity references).
#[derive(Debug, Clone)]
pub struct GroupSummary {
    pub group_id: u64,
    pub status: GroupStatus,
    pub meta: Option<GroupMeta>,
    pub has_backends: bool,
    pub active_job: Option<ActiveJob>,
    pub dc: String,
    pub total_space: u64,
}

fn escalate(base: GroupsetStatus, job: Option<&ActiveJob>) -> GroupsetStatus {
    match job {
        Some(job) if job.stalled => GroupsetStatus::ServiceStalled,
        Some(_) => GroupsetStatus::ServiceActive,
        None => base,
    }
}

pub struct Couple {
    pub id: String,
    pub group_ids: Vec<u64>,
    pub namespace: String,
    pub frozen: bool,
    pub lrc_sibling_id: Option<String>,
    pub settings: HashMap<String, String>,
}

/// All inputs `couple_status` needs beyond the `Couple` value itself.
pub struct CoupleCascadeInput<'a> {
    pub groups: &'a [GroupSummary],
    pub namespace_has_settings: bool,
    pub is_cache_namespace: bool,
    pub forbidden_dc_sharing_among_groups: bool,
    pub forbidden_unmatched_group_total_space: bool,
    pub forbidden_ns_without_settings: bool,
    pub lrc_sibling_all_coupled: Option<bool>,
    pub is_full: bool,
}

/// Implements the ordered cascade of spec §4.D "Replicas couple".
pub fn couple_status(couple: &Couple, input: &CoupleCascadeInput) -> CascadeResult<GroupsetStatus> {
    let archived_with_lrc = || {
        if couple.lrc_sibling_id.is_some()
            && input
                .groups
                .iter()
                .all(|g| g.status == GroupStatus::Init && !g.has_backends)
        {
            Some(CascadeResult::new(
                GroupsetStatus::Archived,
                "Couple is archived: replicas groups are idle, LRC sibling is active",
            ))
        } else {
            None
        }
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
                    .map(|m| m.namespace != couple.namespace)
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
                    format!("Group {}'s meta disagrees with the couple's other groups", g.group_id),
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
                format!("Couple {} is frozen", couple.id),
            ))
        } else {
            None
        }
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

    let any_bad = || {
        input
            .groups
            .iter()
            .find(|g| g.status == GroupStatus::Bad)
            .map(|g| {
                CascadeResult::new(
                    escalate(GroupsetStatus::Bad, g.active_job.as_ref()),
                    format!("Group {} is in state BAD", g.group_id),
                )
            })
    };

    let lrc_sibling_checks = || {
        if couple.lrc_sibling_id.is_none() {
            return None;
        }
        if let Some(g) = input.groups.iter().find(|g| g.status == GroupStatus::Ro) {
            return Some(CascadeResult::new(
                escalate(GroupsetStatus::Bad, g.active_job.as_ref()),
                format!("Group {} is read-only", g.group_id),
            ));
        }
        if let Some(g) = input.groups.iter().find(|g| g.status == GroupStatus::Migrating) {
            return Some(CascadeResult::new(
                escalate(GroupsetStatus::Bad, g.active_job.as_ref()),
                format!("Group {} is migrating", g.group_id),
            ));
        }
        if input.lrc_sibling_all_coupled == Some(true) {
            return Some(CascadeResult::new(
                GroupsetStatus::Archived,
                "Couple is archived: all replicas groups are coupled, LRC sibling active",
            ));
        }
        None
    };

    let no_sibling_cascades = || {
        if couple.lrc_sibling_id.is_some() {
            return None;
        }
        if let Some(g) = input.groups.iter().find(|g| g.status == GroupStatus::Ro) {
            return Some(CascadeResult::new(
                escalate(GroupsetStatus::Ro, g.active_job.as_ref()),
                format!("Group {} is read-only", g.group_id),
            ));
        }
        if let Some(g) = input.groups.iter().find(|g| g.status == GroupStatus::Migrating) {
            return Some(CascadeResult::new(
                escalate(GroupsetStatus::Migrating, g.active_job.as_ref()),
                format!("Group {} is migrating", g.group_id),
            ));
        }
        if input.groups.iter().any(|g| g.status == GroupStatus::Init) {
            return Some(CascadeResult::new(
                GroupsetStatus::Init,
                "Some groups of the couple are in state INIT",
            ));
        }
        if !input.groups.iter().all(|g| g.has_backends) {
            return Some(CascadeResult::new(
                GroupsetStatus::Stalled,
                "Some groups of the couple have no backends",
            ));
        }
        let first_space = input.groups.first().map(|g| g.total_space);
        if input.forbidden_unmatched_group_total_space
            && first_space
                .map(|space| input.groups.iter().any(|g| g.total_space != space))
                .unwrap_or(false)
        {
            return Some(CascadeResult::new(
                GroupsetStatus::Broken,
                "Groups of the couple have unmatched total space",
            ));
        }
        if input.is_full {
            return Some(CascadeResult::new(GroupsetStatus::Full, "Couple is full"));
        }
        None
    };

    let predicates: Vec<&dyn Fn() -> Option<CascadeResult<GroupsetStatus>>> = vec![
        &archived_with_lrc,
        &missing_meta,
        &namespace_mismatch,
        &meta_disagreement,
        &frozen,
        &settings_broken,
        &any_bad,
        &lrc_sibling_checks,
        &no_sibling_cascades,
    ];

    run_cascade(&predicates, CascadeResult::new(GroupsetStatus::Ok, "Couple is OK"))
}

impl Groupset for Couple {
    fn groupset_id(&self) -> &str {
        &self.id
    }

    fn update_status(&self) -> crate::core::status::GroupsetCascadeResult {
        // Callers invoke `couple_status` directly with gathered inputs;
        // this trait method exists for the shared-contract interface and
        // is not used by the builder/query surface, which need the
        // richer `CoupleCascadeInput`.
        CascadeResult::new(GroupsetStatus::Init, "unresolved: call couple_status")
    }

    fn compose_group_meta(&self, frozen: bool) -> HashMap<u64, GroupMeta> {
        let mut sorted = self.group_ids.clone();
        sorted.sort_unstable();
        self.group_ids
            .iter()
            .map(|&gid| (gid, GroupMeta::data(sorted.clone(), self.namespace.clone(), frozen)))
            .collect()
    }

    fn group_ids(&self) -> Vec<u64> {
        self.group_ids.clone()
    }

    fn check_groups(&self) -> StormResult<()> {
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

    fn group(id: u64, status: GroupStatus, namespace: &str, dc: &str) -> GroupSummary {
        GroupSummary {
            group_id: id,
            status,
            meta: Some(GroupMeta::data(vec![101, 102, 103], namespace, false)),
            has_backends: true,
            active_job: None,
            dc: dc.to_string(),
            total_space: 100,
        }
    }

    fn couple() -> Couple {
        Couple {
            id: "101:102:103".to_string(),
            group_ids: vec![101, 102, 103],
            namespace: "img".to_string(),
            frozen: false,
            lrc_sibling_id: None,
            settings: HashMap::new(),
        }
    }

    #[test]
    fn three_coupled_groups_in_distinct_dcs_is_ok() {
        let c = couple();
        let groups = vec![
            group(101, GroupStatus::Coupled, "img", "a"),
            group(102, GroupStatus::Coupled, "img", "b"),
            group(103, GroupStatus::Coupled, "img", "c"),
        ];
        let input = CoupleCascadeInput {
            groups: &groups,
            namespace_has_settings: true,
            is_cache_namespace: false,
            forbidden_dc_sharing_among_groups: true,
            forbidden_unmatched_group_total_space: true,
            forbidden_ns_without_settings: true,
            lrc_sibling_all_coupled: None,
            is_full: false,
        };
        assert_eq!(couple_status(&c, &input).code, GroupsetStatus::Ok);
    }

    #[test]
    fn shared_dc_is_broken_when_forbidden() {
        let c = couple();
        let groups = vec![
            group(101, GroupStatus::Coupled, "img", "a"),
            group(102, GroupStatus::Coupled, "img", "a"),
            group(103, GroupStatus::Coupled, "img", "c"),
        ];
        let input = CoupleCascadeInput {
            groups: &groups,
            namespace_has_settings: true,
            is_cache_namespace: false,
            forbidden_dc_sharing_among_groups: true,
            forbidden_unmatched_group_total_space: false,
            forbidden_ns_without_settings: true,
            lrc_sibling_all_coupled: None,
            is_full: false,
        };
        assert_eq!(couple_status(&c, &input).code, GroupsetStatus::Broken);
    }

    #[test]
    fn broken_backend_outranks_bad_group() {
        let c = couple();
        let groups = vec![
            group(101, GroupStatus::Broken, "img", "a"),
            group(102, GroupStatus::Bad, "img", "b"),
            group(103, GroupStatus::Coupled, "img", "c"),
        ];
        let input = CoupleCascadeInput {
            groups: &groups,
            namespace_has_settings: true,
            is_cache_namespace: false,
            forbidden_dc_sharing_among_groups: false,
            forbidden_unmatched_group_total_space: false,
            forbidden_ns_without_settings: true,
            lrc_sibling_all_coupled: None,
            is_full: false,
        };
        assert_eq!(couple_status(&c, &input).code, GroupsetStatus::Broken);
    }

    #[test]
    fn frozen_meta_flag_wins_over_ok() {
        let c = couple();
        let mut groups = vec![
            group(101, GroupStatus::Coupled, "img", "a"),
            group(102, GroupStatus::Coupled, "img", "b"),
            group(103, GroupStatus::Coupled, "img", "c"),
        ];
        groups[0].meta.as_mut().unwrap().frozen = true;
        let input = CoupleCascadeInput {
            groups: &groups,
            namespace_has_settings: true,
            is_cache_namespace: false,
            forbidden_dc_sharing_among_groups: false,
            forbidden_unmatched_group_total_space: false,
            forbidden_ns_without_settings: true,
            lrc_sibling_all_coupled: None,
            is_full: false,
        };
        assert_eq!(couple_status(&c, &input).code, GroupsetStatus::Frozen);
    }
}
