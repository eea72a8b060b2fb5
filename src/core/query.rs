// src/core/query.rs

//! The query and mutation surface callers use on top of `ClusterState`:
//! filtered listings, group repair, freeze/unfreeze, couple break, and
//! groupset attach (spec §4.G).

use crate::core::collaborators::Collaborators;
use crate::core::errors::{StormError, StormResult};
use crate::core::metakey::{GroupMeta, encode};
use crate::core::state::ClusterState;
use crate::core::status::{GroupStatus, GroupsetStatus};
use std::collections::HashMap;

const METAKEY_RETRIES: u32 = 3;

/// Filters shared by the group/groupset/couple/namespace listings (spec
/// §4.G: "filter by state... namespace, type, and for groups an
/// `in_jobs` predicate").
#[derive(Debug, Clone, Default)]
pub struct GroupFilter {
    pub namespace: Option<String>,
    pub states: Vec<GroupStatus>,
    pub in_jobs: Option<std::collections::HashSet<String>>,
}

pub fn list_groups(state: &ClusterState, filter: &GroupFilter, now: i64) -> Vec<u64> {
    let mut out = Vec::new();
    for gid in state.groups.keys() {
        let Ok(status) = state.derive_group_status(gid, now) else {
            continue;
        };
        if !filter.states.is_empty() && !filter.states.contains(&status.code) {
            continue;
        }
        if let Some(ns) = &filter.namespace {
            let group = state.groups.get(&gid);
            let matches = group
                .and_then(|g| g.meta.as_ref().map(|m| &m.namespace == ns))
                .unwrap_or(false);
            if !matches {
                continue;
            }
        }
        if let Some(in_jobs) = &filter.in_jobs {
            let group = state.groups.get(&gid);
            let matches = group
                .and_then(|g| g.active_job.as_ref().map(|j| in_jobs.contains(&j.job_id)))
                .unwrap_or(false);
            if !matches {
                continue;
            }
        }
        out.push(gid);
    }
    out.sort_unstable();
    out
}

#[derive(Debug, Clone, Default)]
pub struct CoupleFilter {
    pub namespace: Option<String>,
    pub states: Vec<GroupsetStatus>,
}

pub fn list_couples(state: &ClusterState, filter: &CoupleFilter, now: i64) -> Vec<String> {
    let mut out = Vec::new();
    for couple_id in state.groupsets.left().keys() {
        let Ok(status) = state.derive_couple_status(&couple_id, now) else {
            continue;
        };
        if !filter.states.is_empty() && !filter.states.contains(&status.code) {
            continue;
        }
        if let Some(ns) = &filter.namespace {
            let matches = state
                .groupsets
                .left()
                .get(&couple_id)
                .map(|c| &c.namespace == ns)
                .unwrap_or(false);
            if !matches {
                continue;
            }
        }
        out.push(couple_id);
    }
    out.sort_unstable();
    out
}

pub fn list_namespaces(state: &ClusterState, include_deleted: bool) -> Vec<String> {
    let mut out: Vec<String> = state
        .namespaces
        .keys()
        .into_iter()
        .filter(|id| {
            include_deleted
                || state
                    .namespaces
                    .get(id)
                    .map(|n| !n.is_deleted())
                    .unwrap_or(true)
        })
        .collect();
    out.sort_unstable();
    out
}

/// Re-assigns a group's groupset pointer to `force_namespace` and
/// rewrites its metakey. No rollback on error (spec §4.G).
pub async fn repair_groups(
    state: &ClusterState,
    collaborators: &Collaborators,
    group_id: u64,
    force_namespace: Option<&str>,
) -> StormResult<()> {
    let mut group = state.groups.require_mut(&group_id)?;
    let meta = group
        .meta
        .clone()
        .ok_or_else(|| StormError::validation(format!("group {group_id} has no meta to repair")))?;

    let mut updated = meta;
    if let Some(ns) = force_namespace {
        updated.namespace = ns.to_string();
    }
    let blob = encode(&updated)?;
    collaborators
        .storage
        .write_retry(group_id, blob, METAKEY_RETRIES)
        .await?;
    group.meta = Some(updated);
    collaborators.history.record(group_id, "repair").await?;
    Ok(())
}

async fn rewrite_couple_frozen_flag(
    state: &ClusterState,
    collaborators: &Collaborators,
    couple_id: &str,
    frozen: bool,
) -> StormResult<()> {
    let (group_ids, namespace) = {
        let couple = state.groupsets.left().require(&couple_id.to_string())?;
        (couple.group_ids.clone(), couple.namespace.clone())
    };

    for &gid in &group_ids {
        let mut group = state.groups.require_mut(&gid)?;
        let sorted = {
            let mut s = group_ids.clone();
            s.sort_unstable();
            s
        };
        let meta = GroupMeta::data(sorted, namespace.clone(), frozen);
        let blob = encode(&meta)?;
        collaborators
            .storage
            .write_retry(gid, blob.clone(), METAKEY_RETRIES)
            .await?;
        group.meta = Some(meta);
    }

    if let Some(mut couple) = state.groupsets.left().get_mut(&couple_id.to_string()) {
        couple.frozen = frozen;
    }
    Ok(())
}

/// Sets a couple's `frozen` flag via a metakey rewrite with retries. No
/// rollback on error (spec §4.G, §8 scenario 6).
pub async fn freeze_couple(state: &ClusterState, collaborators: &Collaborators, couple_id: &str) -> StormResult<()> {
    rewrite_couple_frozen_flag(state, collaborators, couple_id, true).await
}

pub async fn unfreeze_couple(state: &ClusterState, collaborators: &Collaborators, couple_id: &str) -> StormResult<()> {
    rewrite_couple_frozen_flag(state, collaborators, couple_id, false).await
}

fn break_confirmation_text(couple_id: &str, current_status: GroupsetStatus) -> String {
    let adjective = match current_status {
        GroupsetStatus::Ok | GroupsetStatus::Full => "good",
        _ => "bad",
    };
    format!("Yes, I want to break {adjective} couple {couple_id}")
}

/// Destroys a couple: requires an exact confirmation string matching the
/// state-specific form, removes the metakey from every group with
/// retries, resets each group's meta, then detaches the groupset (spec
/// §4.G, §8 scenario 5).
pub async fn break_couple(
    state: &ClusterState,
    collaborators: &Collaborators,
    group_ids: &[u64],
    confirm: &str,
    now: i64,
) -> StormResult<()> {
    let mut sorted = group_ids.to_vec();
    sorted.sort_unstable();
    let couple_id = sorted.iter().map(|g| g.to_string()).collect::<Vec<_>>().join(":");

    let status = state.derive_couple_status(&couple_id, now)?;
    let expected = break_confirmation_text(&couple_id, status.code);
    if confirm != expected {
        return Err(StormError::validation(format!(
            "confirmation string did not match; expected: {expected}"
        )));
    }

    let namespace = state
        .groupsets
        .left()
        .require(&couple_id)?
        .namespace
        .clone();

    for &gid in &sorted {
        collaborators.storage.remove_retry(gid, METAKEY_RETRIES).await?;
        if let Some(mut group) = state.groups.get_mut(&gid) {
            group.reset_meta();
        }
    }

    state.groupsets.left().remove(&couple_id)?;
    state.detach_groupset(&couple_id, &sorted, &namespace)?;
    Ok(())
}

/// Installs an additional groupset (e.g. an LRC sibling) on an existing
/// couple: checks settings, writes its metakey, re-derives status; on
/// any failure the new groupset is destroyed (spec §4.G).
pub async fn attach_groupset_to_couple(
    state: &ClusterState,
    collaborators: &Collaborators,
    lrc: crate::core::groupset::lrc::Lrc,
) -> StormResult<()> {
    use crate::core::groupset::Groupset;

    lrc.check_groups()?;

    let lrc_id = lrc.groupset_id().to_string();
    let metas = lrc.compose_group_meta(false);

    let mut written = Vec::new();
    let mut failure = None;
    for (&gid, meta) in &metas {
        match encode(meta) {
            Ok(blob) => match collaborators.storage.write_retry(gid, blob, METAKEY_RETRIES).await {
                Ok(()) => written.push(gid),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            },
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }

    if let Some(e) = failure {
        for gid in &written {
            let _ = collaborators.storage.remove_retry(*gid, METAKEY_RETRIES).await;
        }
        return Err(e);
    }

    for (&gid, meta) in &metas {
        if let Some(mut group) = state.groups.get_mut(&gid) {
            group.meta = Some(meta.clone());
            group.groupset_id = Some(lrc_id.clone());
        }
    }

    let namespace = lrc.namespace.clone();
    state.groupsets.add_right(lrc_id.clone(), lrc)?;
    state.attach_groupset_to_namespace(&lrc_id, &namespace);

    for &gid in metas.keys() {
        collaborators.history.record(gid, "attach_groupset").await?;
    }

    Ok(())
}

/// Rebuilds the `(cache_key_id, couple_id) -> {data_groups, cache_groups}`
/// index from the metadata store's couple records (SPEC_FULL §B.3,
/// spec §4.G: "a periodic task rebuilds a ... index").
pub async fn rebuild_cached_key_index(
    state: &ClusterState,
    collaborators: &Collaborators,
) -> StormResult<usize> {
    let mut entries = HashMap::new();
    for couple_id in state.groupsets.left().keys() {
        let Some(couple) = state.groupsets.left().get(&couple_id) else {
            continue;
        };
        let cache_groups: Vec<u64> = couple
            .group_ids
            .iter()
            .filter(|&&gid| {
                state
                    .groups
                    .get(&gid)
                    .and_then(|g| g.meta.clone())
                    .and_then(|m| m.group_type)
                    .map(|t| t == "cache")
                    .unwrap_or(false)
            })
            .copied()
            .collect();
        entries.insert(
            couple_id.clone(),
            (couple.namespace.clone(), couple.group_ids.clone(), cache_groups),
        );
    }
    collaborators.metadata.rebuild_cached_key_index(entries).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::core::collaborators::test_doubles::{FakeInventory, FakeLock, FakeStorage};
    use crate::core::collaborators::NullGroupHistoryLog;
    use crate::core::group::Group;
    use crate::core::groupset::replicas::Couple;
    use crate::core::metakey::GroupMeta;
    use crate::core::topology::{BackendKey, NodeBackend, NodeKey, HostAddr, NodeFamily};
    use std::sync::Arc;

    #[test]
    fn good_couple_confirmation_uses_good_adjective() {
        assert_eq!(
            break_confirmation_text("1001:1002:1003", GroupsetStatus::Ok),
            "Yes, I want to break good couple 1001:1002:1003"
        );
    }

    #[test]
    fn bad_couple_confirmation_uses_bad_adjective() {
        assert_eq!(
            break_confirmation_text("1001:1002:1003", GroupsetStatus::Bad),
            "Yes, I want to break bad couple 1001:1002:1003"
        );
    }

    struct NoopMetadataStore;
    #[async_trait::async_trait]
    impl crate::core::collaborators::MetadataStore for NoopMetadataStore {
        async fn read_namespace_settings(&self, _namespace: &str) -> StormResult<Option<Vec<u8>>> {
            Ok(None)
        }
        async fn write_namespace_settings(&self, _namespace: &str, _doc: Vec<u8>) -> StormResult<()> {
            Ok(())
        }
        async fn list_namespaces(&self) -> StormResult<Vec<String>> {
            Ok(vec![])
        }
        async fn write_couple_record(&self, _couple_id: &str, _doc: Vec<u8>) -> StormResult<()> {
            Ok(())
        }
        async fn remove_couple_record(&self, _couple_id: &str) -> StormResult<()> {
            Ok(())
        }
        async fn rebuild_cached_key_index(
            &self,
            _entries: HashMap<String, (String, Vec<u64>, Vec<u64>)>,
        ) -> StormResult<usize> {
            Ok(0)
        }
    }

    fn collaborators() -> Collaborators {
        Collaborators {
            inventory: Arc::new(FakeInventory { dc_by_host: HashMap::new() }),
            metadata: Arc::new(NoopMetadataStore),
            lock: Arc::new(FakeLock::default()),
            storage: Arc::new(FakeStorage::default()),
            history: Arc::new(NullGroupHistoryLog),
        }
    }

    fn backend_key(gid: u64) -> BackendKey {
        BackendKey {
            node: NodeKey {
                host: HostAddr(format!("host{gid}")),
                port: 1025,
                family: NodeFamily::Ipv4,
            },
            backend_id: 0,
        }
    }

    /// A populated couple whose groups all read back Ok (spec §8 scenario
    /// 5/6 fixtures): backends present and fresh, meta consistent and
    /// pointing at the couple, cache namespace so no settings doc is
    /// required.
    fn good_couple_state(group_ids: &[u64], now: i64) -> ClusterState {
        let state = ClusterState::new(&Config::default());
        let couple_id = group_ids
            .iter()
            .map(|g| g.to_string())
            .collect::<Vec<_>>()
            .join(":");

        for &gid in group_ids {
            let bk = backend_key(gid);
            let mut backend = NodeBackend::new(bk.clone());
            backend.stat.total_space = 100;
            backend.stat.last_collect_ts = Some(now);
            state.node_backends.add(bk.clone(), backend);

            let mut group = Group::new(gid);
            group.backends.push(bk);
            group.meta = Some(GroupMeta::data(
                group_ids.to_vec(),
                GroupMeta::CACHE_NAMESPACE.to_string(),
                false,
            ));
            group.groupset_id = Some(couple_id.clone());
            state.groups.add(gid, group);
        }

        state
            .groupsets
            .add_left(
                couple_id,
                Couple {
                    id: group_ids
                        .iter()
                        .map(|g| g.to_string())
                        .collect::<Vec<_>>()
                        .join(":"),
                    group_ids: group_ids.to_vec(),
                    namespace: GroupMeta::CACHE_NAMESPACE.to_string(),
                    frozen: false,
                    lrc_sibling_id: None,
                    settings: HashMap::new(),
                },
            )
            .unwrap();
        state
    }

    #[tokio::test]
    async fn freeze_then_unfreeze_round_trips_to_ok() {
        let group_ids = [201u64, 202, 203];
        let state = good_couple_state(&group_ids, 1_000);
        let couple_id = "201:202:203";
        let collaborators = collaborators();

        let before = state.derive_couple_status(couple_id, 1_000).unwrap();
        assert_eq!(before.code, GroupsetStatus::Ok);

        freeze_couple(&state, &collaborators, couple_id).await.unwrap();
        let frozen = state.derive_couple_status(couple_id, 1_000).unwrap();
        assert_eq!(frozen.code, GroupsetStatus::Frozen);
        for &gid in &group_ids {
            assert!(!collaborators.storage.read_data(gid).await.unwrap().is_empty());
        }

        unfreeze_couple(&state, &collaborators, couple_id).await.unwrap();
        let after = state.derive_couple_status(couple_id, 1_000).unwrap();
        assert_eq!(after.code, GroupsetStatus::Ok);
    }

    #[tokio::test]
    async fn break_couple_requires_exact_good_confirmation_string() {
        let group_ids = [301u64, 302, 303];
        let state = good_couple_state(&group_ids, 1_000);
        let collaborators = collaborators();

        let wrong = break_couple(&state, &collaborators, &group_ids, "nope", 1_000).await;
        assert!(matches!(wrong, Err(StormError::Validation(_))));
        assert!(state.groupsets.left().contains(&"301:302:303".to_string()));

        break_couple(
            &state,
            &collaborators,
            &group_ids,
            "Yes, I want to break good couple 301:302:303",
            1_000,
        )
        .await
        .unwrap();

        assert!(!state.groupsets.left().contains(&"301:302:303".to_string()));
        for &gid in &group_ids {
            assert!(state.groups.get(&gid).unwrap().meta.is_none());
            assert!(collaborators.storage.read_data(gid).await.unwrap().is_empty());
        }
    }
}
