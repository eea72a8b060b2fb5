// src/core/group.rs

//! The `Group` entity: an ordered list of node-backends, a parsed `meta`
//! document, an optional active-job summary, and a link to at most one
//! groupset (spec §3, §4.C).

use crate::core::metakey::GroupMeta;
use crate::core::status::{CascadeResult, GroupStatus, GroupsetStatus, run_cascade};
use crate::core::topology::{BackendKey, NodeBackendStatus};

/// `type` is derived from `meta` plus a couple of fallbacks (spec §3,
/// §4.C): absence of meta or an unrecognized `meta.type` maps to
/// `Unknown`; a cache-group path prefix on the backend's mount implies
/// `UncoupledCache` even with no meta at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupType {
    Unknown,
    Uncoupled,
    Data,
    Cache,
    UncoupledCache,
    Lrc8_2_2V1,
    UncoupledLrc8_2_2V1,
}

impl GroupType {
    /// The bare `"data"` constant the original compares a group's `type`
    /// field against directly rather than through a named constant (spec
    /// §9, open question: "treat as the constant `"data"`").
    pub const TYPE_DATA: &'static str = "data";

    pub fn as_meta_str(self) -> &'static str {
        match self {
            GroupType::Unknown => "unknown",
            GroupType::Uncoupled => "uncoupled",
            GroupType::Data => "data",
            GroupType::Cache => "cache",
            GroupType::UncoupledCache => "uncoupled_cache",
            GroupType::Lrc8_2_2V1 => "lrc-8-2-2-v1",
            GroupType::UncoupledLrc8_2_2V1 => "uncoupled_lrc-8-2-2-v1",
        }
    }
}

/// Derives `type` from a parsed meta document plus fallbacks. `has_meta`
/// distinguishes "no meta at all" (→ `Uncoupled` unless the path-prefix
/// fallback applies) from "meta present but type unset/unrecognized" (→
/// `Unknown`).
pub fn derive_group_type(meta: Option<&GroupMeta>, has_cache_path_prefix: bool) -> GroupType {
    match meta {
        None => {
            if has_cache_path_prefix {
                GroupType::UncoupledCache
            } else {
                GroupType::Uncoupled
            }
        }
        Some(meta) => match meta.group_type.as_deref() {
            Some(GroupType::TYPE_DATA) => GroupType::Data,
            Some("cache") => GroupType::Cache,
            Some("uncoupled_cache") => GroupType::UncoupledCache,
            Some("lrc-8-2-2-v1") => GroupType::Lrc8_2_2V1,
            Some("uncoupled_lrc-8-2-2-v1") => GroupType::UncoupledLrc8_2_2V1,
            _ => GroupType::Unknown,
        },
    }
}

/// A summary of the reconfiguration job, if any, currently owning this
/// group (spec §4.D: "the couple has an active job matching
/// `meta.service.job_id`").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveJob {
    pub job_id: String,
    pub stalled: bool,
}

#[derive(Debug, Clone)]
pub struct Group {
    pub group_id: u64,
    pub backends: Vec<BackendKey>,
    pub meta: Option<GroupMeta>,
    pub active_job: Option<ActiveJob>,
    pub groupset_id: Option<String>,
}

impl Group {
    pub fn new(group_id: u64) -> Self {
        Self {
            group_id,
            backends: Vec::new(),
            meta: None,
            active_job: None,
            groupset_id: None,
        }
    }

    /// Setting `meta` to `None` resets the group to `Init` (spec §3:
    /// "Group is re-parsable").
    pub fn reset_meta(&mut self) {
        self.meta = None;
    }

    pub fn group_type(&self, has_cache_path_prefix: bool) -> GroupType {
        derive_group_type(self.meta.as_ref(), has_cache_path_prefix)
    }

    /// Sum of the group's backends' `effective_space` (spec §4.C); same
    /// shape for the free-space variant.
    pub fn effective_space(&self, per_backend: impl Fn(&BackendKey) -> u64) -> u64 {
        self.backends.iter().map(per_backend).sum()
    }

    /// Inputs to the group status cascade, gathered by the caller (the
    /// root state) since a `Group` does not hold references to its
    /// sibling entities (spec §9: prefer arena-and-index over lifetime
    /// hazards).
    pub fn derive_status(&self, input: &GroupCascadeInput) -> CascadeResult<GroupStatus> {
        let no_backends = || {
            if self.backends.is_empty() {
                Some(CascadeResult::new(GroupStatus::Init, "Group has no backends"))
            } else {
                None
            }
        };

        let dht_forbidden = || {
            if input.forbidden_dht_groups && self.backends.len() > 1 {
                Some(CascadeResult::new(
                    GroupStatus::Broken,
                    "Group has more than one backend and DHT groups are forbidden",
                ))
            } else {
                None
            }
        };

        let no_meta = || {
            if self.meta.is_none() {
                Some(CascadeResult::new(GroupStatus::Init, "Group has no meta"))
            } else {
                None
            }
        };

        let any_backend_broken = || {
            if input
                .backend_statuses
                .iter()
                .any(|s| *s == NodeBackendStatus::Broken)
            {
                Some(CascadeResult::new(
                    GroupStatus::Broken,
                    "Group has a broken backend",
                ))
            } else {
                None
            }
        };

        let type_specific = || {
            let meta = self.meta.as_ref()?;
            match meta.group_type.as_deref() {
                Some(GroupType::TYPE_DATA) => {
                    if meta.couple.is_empty() || !input.groupset_built {
                        Some(CascadeResult::new(
                            GroupStatus::Bad,
                            "Data group's couple is missing or not built",
                        ))
                    } else {
                        None
                    }
                }
                Some("lrc-8-2-2-v1") => {
                    let sibling_has_us = meta
                        .lrc
                        .as_ref()
                        .map(|l| l.groups.contains(&self.group_id))
                        .unwrap_or(false);
                    if !sibling_has_us || !input.groupset_built {
                        Some(CascadeResult::new(
                            GroupStatus::Bad,
                            "LRC group's sibling list or groupset is missing",
                        ))
                    } else {
                        None
                    }
                }
                _ => None,
            }
        };

        let read_only = || {
            if input
                .backend_statuses
                .iter()
                .any(|s| *s == NodeBackendStatus::Ro)
            {
                let migrating = self
                    .meta
                    .as_ref()
                    .and_then(|m| m.service.as_ref())
                    .map(|s| s.status == "MIGRATING")
                    .unwrap_or(false)
                    && self
                        .active_job
                        .as_ref()
                        .zip(self.meta.as_ref().and_then(|m| m.service.as_ref()))
                        .map(|(job, svc)| job.job_id == svc.job_id)
                        .unwrap_or(false);
                if migrating {
                    Some(CascadeResult::new(GroupStatus::Migrating, "Group is migrating"))
                } else {
                    Some(CascadeResult::new(GroupStatus::Ro, "Group is read-only"))
                }
            } else {
                None
            }
        };

        let not_all_ok = || {
            if input
                .backend_statuses
                .iter()
                .any(|s| *s != NodeBackendStatus::Ok)
            {
                Some(CascadeResult::new(
                    GroupStatus::Bad,
                    "Not all of group's backends are in OK state",
                ))
            } else {
                None
            }
        };

        let predicates: Vec<&dyn Fn() -> Option<CascadeResult<GroupStatus>>> = vec![
            &no_backends,
            &dht_forbidden,
            &no_meta,
            &any_backend_broken,
            &type_specific,
            &read_only,
            &not_all_ok,
        ];

        run_cascade(
            &predicates,
            CascadeResult::new(GroupStatus::Coupled, "Group is coupled"),
        )
    }
}

pub struct GroupCascadeInput {
    pub forbidden_dht_groups: bool,
    pub backend_statuses: Vec<NodeBackendStatus>,
    pub groupset_built: bool,
}

/// Whether the groupset this group belongs to should be considered
/// archived-eligible: called out by the couple cascade (spec §4.D.1).
pub fn all_init_with_no_backends(groups: &[&Group]) -> bool {
    groups.iter().all(|g| g.backends.is_empty() && g.meta.is_none())
}

pub fn status_is_terminal_failure(status: GroupsetStatus) -> bool {
    matches!(
        status,
        GroupsetStatus::Bad
            | GroupsetStatus::Broken
            | GroupsetStatus::BadDataUnavailable
            | GroupsetStatus::BadIndicesUnavailable
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::metakey::GroupMeta;

    #[test]
    fn no_backends_is_init() {
        let group = Group::new(1);
        let input = GroupCascadeInput {
            forbidden_dht_groups: false,
            backend_statuses: vec![],
            groupset_built: true,
        };
        assert_eq!(group.derive_status(&input).code, GroupStatus::Init);
    }

    #[test]
    fn broken_backend_wins_over_bad() {
        let mut group = Group::new(1);
        group.backends.push(BackendKey {
            node: crate::core::topology::NodeKey {
                host: crate::core::topology::HostAddr("h1".to_string()),
                port: 1025,
                family: crate::core::topology::NodeFamily::Ipv4,
            },
            backend_id: 0,
        });
        group.meta = Some(GroupMeta::data(vec![1], "ns", false));
        let input = GroupCascadeInput {
            forbidden_dht_groups: false,
            backend_statuses: vec![NodeBackendStatus::Broken, NodeBackendStatus::Ro],
            groupset_built: true,
        };
        assert_eq!(group.derive_status(&input).code, GroupStatus::Broken);
    }

    #[test]
    fn type_derivation_falls_back_to_cache_path_prefix() {
        assert_eq!(derive_group_type(None, true), GroupType::UncoupledCache);
        assert_eq!(derive_group_type(None, false), GroupType::Uncoupled);
    }
}
