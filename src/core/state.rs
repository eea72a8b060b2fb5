// src/core/state.rs

//! The root `ClusterState` value: the process-wide repositories plus the
//! policy snapshot every status cascade reads from (spec §9 design note:
//! "model them as fields of a root `State` value owned by the scheduler
//! and thread that value through handlers, rather than as true globals").

use crate::config::Config;
use crate::core::errors::StormResult;
use crate::core::group::{Group, GroupCascadeInput};
use crate::core::groupset::lrc::{Lrc, LrcCascadeInput, LrcGroupSummary, lrc_status};
use crate::core::groupset::replicas::{Couple, CoupleCascadeInput, GroupSummary, couple_status};
use crate::core::metakey::GroupMeta;
use crate::core::namespace::Namespace;
use crate::core::repository::{MultiRepository, Repository};
use crate::core::status::{GroupCascadeResult, GroupsetCascadeResult};
use crate::core::topology::{BackendKey, Filesystem, FsKey, Host, HostAddr, Node, NodeBackend, NodeBackendStatus, NodeKey};
use serde_json::Value;
use std::collections::HashSet;

/// The policy toggles and thresholds every cascade and the builder read,
/// snapshotted from `Config` at construction (spec §6).
#[derive(Debug, Clone)]
pub struct PolicySnapshot {
    pub forbidden_dht_groups: bool,
    pub forbidden_dc_sharing_among_groups: bool,
    pub forbidden_ns_without_settings: bool,
    pub forbidden_unmatched_group_total_space: bool,
    pub vfs_reserved_space: u64,
    pub stale_timeout_secs: i64,
}

impl From<&Config> for PolicySnapshot {
    fn from(config: &Config) -> Self {
        Self {
            forbidden_dht_groups: config.policy.forbidden_dht_groups,
            forbidden_dc_sharing_among_groups: config.policy.forbidden_dc_sharing_among_groups,
            forbidden_ns_without_settings: config.policy.forbidden_ns_without_settings,
            forbidden_unmatched_group_total_space: config.policy.forbidden_unmatched_group_total_space,
            vfs_reserved_space: config.reserved_space,
            stale_timeout_secs: config.node_backend_stat_stale_timeout_secs as i64,
        }
    }
}

/// The full cluster state: topology, groups, groupsets, and namespaces,
/// plus the policy snapshot and the precomputed LRC reconstruction table
/// (spec §3, §4.A, §9).
pub struct ClusterState {
    pub hosts: Repository<HostAddr, Host>,
    pub nodes: Repository<NodeKey, Node>,
    pub node_backends: Repository<BackendKey, NodeBackend>,
    pub filesystems: Repository<FsKey, Filesystem>,
    pub groups: Repository<u64, Group>,
    pub namespaces: Repository<String, Namespace>,
    pub groupsets: MultiRepository<String, Couple, Lrc>,
    pub policy: PolicySnapshot,
    bad_data_parts_table: HashSet<Vec<usize>>,
}

impl ClusterState {
    pub fn new(config: &Config) -> Self {
        Self {
            hosts: Repository::new("host"),
            nodes: Repository::new("node"),
            node_backends: Repository::new("node_backend"),
            filesystems: Repository::new("filesystem"),
            groups: Repository::new("group"),
            namespaces: Repository::new("namespace"),
            groupsets: MultiRepository::new("groupset", Repository::new("couple"), Repository::new("lrc")),
            policy: PolicySnapshot::from(config),
            bad_data_parts_table: crate::core::groupset::lrc::generate_bad_data_parts_indices(),
        }
    }

    /// The DC a group's backends live in, lenient (`"unknown"` if the
    /// group has no backends or its host has no resolved DC).
    pub fn group_dc(&self, group_id: u64) -> String {
        let Some(group) = self.groups.get(&group_id) else {
            return "unknown".to_string();
        };
        group
            .backends
            .first()
            .and_then(|b| self.hosts.get(&b.node.host))
            .and_then(|h| h.dc().map(str::to_string))
            .unwrap_or_else(|| "unknown".to_string())
    }

    fn backend_statuses(&self, group: &Group, now: i64) -> Vec<NodeBackendStatus> {
        group
            .backends
            .iter()
            .filter_map(|bk| self.node_backends.get(bk))
            .map(|nb| nb.status(now, self.policy.stale_timeout_secs))
            .collect()
    }

    /// Derives a single group's status, gathering the cascade inputs from
    /// this state (spec §4.D "Group" cascade).
    pub fn derive_group_status(&self, group_id: u64, now: i64) -> StormResult<GroupCascadeResult> {
        let group = self.groups.require(&group_id)?;
        let groupset_built = group
            .groupset_id
            .as_ref()
            .map(|id| self.groupsets.contains(id))
            .unwrap_or(false);
        let input = GroupCascadeInput {
            forbidden_dht_groups: self.policy.forbidden_dht_groups,
            backend_statuses: self.backend_statuses(&group, now),
            groupset_built,
        };
        Ok(group.derive_status(&input))
    }

    fn group_summary(&self, group_id: u64, now: i64) -> StormResult<GroupSummary> {
        let status = self.derive_group_status(group_id, now)?;
        let group = self.groups.require(&group_id)?;
        let total_space = group
            .backends
            .iter()
            .filter_map(|bk| self.node_backends.get(bk))
            .map(|nb| nb.stat.total_space)
            .sum();
        Ok(GroupSummary {
            group_id,
            status: status.code,
            meta: group.meta.clone(),
            has_backends: !group.backends.is_empty(),
            active_job: group.active_job.clone(),
            dc: self.group_dc(group_id),
            total_space,
        })
    }

    /// Derives a couple's status (spec §4.D "Replicas couple" cascade).
    pub fn derive_couple_status(&self, couple_id: &str, now: i64) -> StormResult<GroupsetCascadeResult> {
        let couple = self.groupsets.left().require(&couple_id.to_string())?;
        let groups: Vec<GroupSummary> = couple
            .group_ids
            .iter()
            .map(|&gid| self.group_summary(gid, now))
            .collect::<StormResult<_>>()?;

        let namespace_has_settings = self
            .namespaces
            .get(&couple.namespace)
            .map(|n| n.has_settings())
            .unwrap_or(false);
        let is_cache_namespace = couple.namespace == GroupMeta::CACHE_NAMESPACE;

        let lrc_sibling_all_coupled = match &couple.lrc_sibling_id {
            Some(sibling_id) => {
                let lrc = self.groupsets.right().require(sibling_id)?;
                let all_coupled = lrc
                    .group_ids
                    .iter()
                    .map(|&gid| self.derive_group_status(gid, now))
                    .collect::<StormResult<Vec<_>>>()?
                    .iter()
                    .all(|s| s.code == crate::core::status::GroupStatus::Coupled);
                Some(all_coupled)
            }
            None => None,
        };

        let reserved_space_percentage = self
            .namespaces
            .get(&couple.namespace)
            .and_then(|n| n.settings.pointer("/reserved-space-percentage").and_then(Value::as_f64))
            .unwrap_or(0.0);
        let is_full = self.couple_is_full(&couple, reserved_space_percentage)?;

        let input = CoupleCascadeInput {
            groups: &groups,
            namespace_has_settings,
            is_cache_namespace,
            forbidden_dc_sharing_among_groups: self.policy.forbidden_dc_sharing_among_groups,
            forbidden_unmatched_group_total_space: self.policy.forbidden_unmatched_group_total_space,
            forbidden_ns_without_settings: self.policy.forbidden_ns_without_settings,
            lrc_sibling_all_coupled,
            is_full,
        };
        Ok(couple_status(&couple, &input))
    }

    /// Derives an LRC groupset's status (spec §4.D "LRC-8-2-2" cascade).
    pub fn derive_lrc_status(&self, lrc_id: &str, now: i64) -> StormResult<GroupsetCascadeResult> {
        let lrc = self.groupsets.right().require(&lrc_id.to_string())?;
        let groups: Vec<LrcGroupSummary> = lrc
            .group_ids
            .iter()
            .enumerate()
            .map(|(index, &gid)| {
                let status = self.derive_group_status(gid, now)?;
                let group = self.groups.require(&gid)?;
                Ok(LrcGroupSummary {
                    group_id: gid,
                    index,
                    status: status.code,
                    meta: group.meta.clone(),
                    active_job: group.active_job.clone(),
                    dc: self.group_dc(gid),
                })
            })
            .collect::<StormResult<_>>()?;

        let namespace_has_settings = self
            .namespaces
            .get(&lrc.namespace)
            .map(|n| n.has_settings())
            .unwrap_or(false);
        let is_cache_namespace = lrc.namespace == GroupMeta::CACHE_NAMESPACE;

        let input = LrcCascadeInput {
            groups: &groups,
            namespace_has_settings,
            is_cache_namespace,
            forbidden_dc_sharing_among_groups: self.policy.forbidden_dc_sharing_among_groups,
            forbidden_ns_without_settings: self.policy.forbidden_ns_without_settings,
            bad_data_parts_table: &self.bad_data_parts_table,
        };
        Ok(lrc_status(&lrc, &input))
    }

    /// A couple is full once any backend it owns is full under the
    /// namespace's `reserved-space-percentage`, or the couple has no
    /// effective free space left at all (spec §4.D.6).
    fn couple_is_full(&self, couple: &Couple, reserved_space_percentage: f64) -> StormResult<bool> {
        for &gid in &couple.group_ids {
            let Some(group) = self.groups.get(&gid) else { continue };
            for bk in &group.backends {
                if let Some(nb) = self.node_backends.get(bk) {
                    if nb.stat.is_full(self.policy.vfs_reserved_space, reserved_space_percentage) {
                        return Ok(true);
                    }
                }
            }
        }
        Ok(self.couple_effective_free_space(&couple.id)? == 0)
    }

    /// Sum of effective free space across a couple's groups (spec §3,
    /// SPEC_FULL §B.4: `get_monitor_effective_free_space`).
    pub fn couple_effective_free_space(&self, couple_id: &str) -> StormResult<u64> {
        let couple = self.groupsets.left().require(&couple_id.to_string())?;
        let mut total = 0u64;
        for &gid in &couple.group_ids {
            let group = self.groups.require(&gid)?;
            for bk in &group.backends {
                if let Some(nb) = self.node_backends.get(bk) {
                    total += nb.stat.effective_free_space(self.policy.vfs_reserved_space);
                }
            }
        }
        Ok(total)
    }

    /// Detaches a groupset from its namespace and clears the `groupset`
    /// pointer on every one of its groups, re-deriving their statuses as
    /// a side effect of the pointer clear (spec §3: "Destruction of a
    /// Groupset detaches it from its namespace, clears the `groupset`
    /// pointer on all its groups, and re-runs those groups' status
    /// derivation").
    pub fn detach_groupset(&self, groupset_id: &str, group_ids: &[u64], namespace: &str) -> StormResult<()> {
        for &gid in group_ids {
            if let Some(mut group) = self.groups.get_mut(&gid) {
                if group.groupset_id.as_deref() == Some(groupset_id) {
                    group.groupset_id = None;
                }
            }
        }
        if let Some(mut ns) = self.namespaces.get_mut(&namespace.to_string()) {
            ns.groupset_ids.remove(groupset_id);
        }
        Ok(())
    }

    /// Attaches a freshly built groupset to its namespace, creating the
    /// namespace if absent (spec §4.F "Commit").
    pub fn attach_groupset_to_namespace(&self, groupset_id: &str, namespace: &str) {
        if !self.namespaces.contains(&namespace.to_string()) {
            self.namespaces.add(namespace.to_string(), Namespace::new(namespace));
        }
        if let Some(mut ns) = self.namespaces.get_mut(&namespace.to_string()) {
            ns.groupset_ids.insert(groupset_id.to_string());
        }
    }
}

impl std::fmt::Debug for ClusterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterState")
            .field("hosts", &self.hosts.len())
            .field("groups", &self.groups.len())
            .field("namespaces", &self.namespaces.len())
            .field("groupsets", &self.groupsets.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::topology::NodeFamily;
    use serde_json::json;
    use std::collections::HashMap;

    fn state() -> ClusterState {
        ClusterState::new(&Config::default())
    }

    #[test]
    fn couple_is_full_when_a_backend_has_no_effective_free_space() {
        let state = state();
        let group_ids = [101u64, 102, 103];
        let couple_id = "101:102:103".to_string();

        state.namespaces.add("img".to_string(), Namespace::new("img"));
        state
            .namespaces
            .get_mut(&"img".to_string())
            .unwrap()
            .settings = json!({"reserved-space-percentage": 0.0});

        for &gid in &group_ids {
            let bk = BackendKey {
                node: NodeKey {
                    host: HostAddr(format!("host{gid}")),
                    port: 1025,
                    family: NodeFamily::Ipv4,
                },
                backend_id: 0,
            };
            let mut backend = NodeBackend::new(bk.clone());
            backend.stat.total_space = 100;
            backend.stat.free_space = 0;
            backend.stat.used_space = 100;
            backend.stat.last_collect_ts = Some(1_000);
            state.node_backends.add(bk.clone(), backend);

            let mut group = Group::new(gid);
            group.backends.push(bk);
            group.meta = Some(GroupMeta::data(group_ids.to_vec(), "img", false));
            group.groupset_id = Some(couple_id.clone());
            state.groups.add(gid, group);
        }

        state
            .groupsets
            .add_left(
                couple_id.clone(),
                Couple {
                    id: couple_id.clone(),
                    group_ids: group_ids.to_vec(),
                    namespace: "img".to_string(),
                    frozen: false,
                    lrc_sibling_id: None,
                    settings: HashMap::new(),
                },
            )
            .unwrap();

        let result = state.derive_couple_status(&couple_id, 1_000).unwrap();
        assert_eq!(result.code, crate::core::status::GroupsetStatus::Full);
    }

    #[test]
    fn fresh_state_has_empty_repositories() {
        let state = state();
        assert!(state.groups.is_empty());
        assert!(state.namespaces.is_empty());
        assert!(state.groupsets.is_empty());
    }

    #[test]
    fn group_dc_is_unknown_for_backendless_group() {
        let state = state();
        state.groups.add(1, Group::new(1));
        assert_eq!(state.group_dc(1), "unknown");
    }

    #[test]
    fn attach_groupset_creates_namespace_on_demand() {
        let state = state();
        state.attach_groupset_to_namespace("101:102:103", "img");
        assert!(state.namespaces.contains(&"img".to_string()));
        assert!(state
            .namespaces
            .get(&"img".to_string())
            .unwrap()
            .groupset_ids
            .contains("101:102:103"));
    }

    #[test]
    fn detach_groupset_clears_group_pointers() {
        let state = state();
        let mut group = Group::new(101);
        group.groupset_id = Some("101:102:103".to_string());
        state.groups.add(101, group);
        state.attach_groupset_to_namespace("101:102:103", "img");

        state.detach_groupset("101:102:103", &[101], "img").unwrap();

        assert!(state.groups.get(&101).unwrap().groupset_id.is_none());
        assert!(!state
            .namespaces
            .get(&"img".to_string())
            .unwrap()
            .groupset_ids
            .contains("101:102:103"));
    }

    #[test]
    fn missing_couple_status_lookup_is_not_found() {
        let state = state();
        assert!(state.derive_couple_status("nope", 0).is_err());
    }
}
