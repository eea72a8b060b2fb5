// src/core/builder/mod.rs

//! The couple builder: topological selection of K groups across N
//! couples, per-group locking, and the consistent metakey write (spec
//! §4.F — the largest single component of the core).

pub mod lock_coordinator;
pub mod select;
pub mod topology_tree;

use crate::core::builder::lock_coordinator::{
    acquire_group_locks, group_lock_id, release_group_locks, write_metakeys_consistently,
};
use crate::core::builder::select::{UncoupledCandidate, choose_groups};
use crate::core::builder::topology_tree::NsAccounting;
use crate::core::collaborators::Collaborators;
use crate::core::errors::StormError;
use crate::core::metakey::{GroupMeta, encode};
use crate::core::metrics::{BUILDER_ATTEMPTS_TOTAL, BUILDER_FAILURES_TOTAL, CLUSTER_LOCK_CONTENDED_TOTAL};
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

pub const CLUSTER_LOCK_ID: &str = "cluster";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitState {
    Coupled,
    Frozen,
}

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub size: usize,
    pub couples: usize,
    pub namespace: String,
    pub match_group_space: bool,
    pub init_state: InitState,
    /// One entry per couple (length ≤ `size`); empty means "no mandatory
    /// groups for that couple".
    pub mandatory_groups: Vec<Vec<u64>>,
    pub dry_run: bool,
}

impl BuildOptions {
    pub fn mandatory_for(&self, couple_index: usize) -> Vec<u64> {
        self.mandatory_groups.get(couple_index).cloned().unwrap_or_default()
    }

    pub fn validate(&self) -> Result<(), StormError> {
        if self.size == 0 {
            return Err(StormError::validation("couple size must be positive"));
        }
        if self.couples == 0 {
            return Err(StormError::validation("couples count must be positive"));
        }
        for mandatory in &self.mandatory_groups {
            if mandatory.len() > self.size {
                return Err(StormError::validation(
                    "mandatory_groups for a couple cannot exceed the requested size",
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub couple_id: String,
    pub group_ids: Vec<u64>,
}

fn couple_id_for(group_ids: &[u64]) -> String {
    let mut sorted = group_ids.to_vec();
    sorted.sort_unstable();
    sorted.iter().map(|g| g.to_string()).collect::<Vec<_>>().join(":")
}

/// Selects groups for a single couple, retrying by elimination whenever
/// the chosen candidates lose a lock race (spec §4.F: "remove those
/// groups from consideration... and retry the inner selection until
/// selection succeeds or candidates are exhausted").
async fn build_one_couple(
    collaborators: &Collaborators,
    options: &BuildOptions,
    couple_index: usize,
    mut pool: Vec<UncoupledCandidate>,
    levels: &[String],
    dc_depth: usize,
    accounting: &NsAccounting,
) -> Result<BuildOutcome, String> {
    let mandatory: HashSet<u64> = options.mandatory_for(couple_index).into_iter().collect();
    let mut excluded: HashSet<u64> = HashSet::new();

    loop {
        pool.retain(|c| !excluded.contains(&c.group_id));

        let candidates: Vec<UncoupledCandidate> = pool.clone();
        let selection = choose_groups(
            &candidates,
            options.size,
            0,
            levels,
            &mandatory,
            accounting,
            true,
            dc_depth,
            &HashSet::new(),
        );

        let (chosen, _weight) = match selection {
            Some(result) => result,
            None => {
                BUILDER_FAILURES_TOTAL.with_label_values(&["no_valid_combination"]).inc();
                return Err(
                    "Not enough valid dcs and/or groups to select from for the given couple"
                        .to_string(),
                );
            }
        };

        match acquire_group_locks(collaborators.lock.as_ref(), &chosen).await {
            Ok(Ok(())) => {
                let meta = GroupMeta::data(
                    {
                        let mut s = chosen.clone();
                        s.sort_unstable();
                        s
                    },
                    options.namespace.clone(),
                    options.init_state == InitState::Frozen,
                );

                let mut metas = HashMap::new();
                for &gid in &chosen {
                    match encode(&meta) {
                        Ok(blob) => {
                            metas.insert(gid, blob);
                        }
                        Err(e) => {
                            release_group_locks(collaborators.lock.as_ref(), &chosen).await;
                            return Err(format!("failed to encode metakey: {e}"));
                        }
                    }
                }

                let write_result = if options.dry_run {
                    Ok(())
                } else {
                    write_metakeys_consistently(collaborators.storage.as_ref(), &metas).await
                };

                release_group_locks(collaborators.lock.as_ref(), &chosen).await;

                return match write_result {
                    Ok(()) => {
                        if !options.dry_run {
                            for &gid in &chosen {
                                let _ = collaborators
                                    .history
                                    .record(gid, "couple_build")
                                    .await;
                            }
                        }
                        Ok(BuildOutcome {
                            couple_id: couple_id_for(&chosen),
                            group_ids: chosen,
                        })
                    }
                    Err(e) => {
                        BUILDER_FAILURES_TOTAL.with_label_values(&["metakey_write"]).inc();
                        Err(format!("metakey write failed: {e}"))
                    }
                };
            }
            Ok(Err(contended)) => {
                for gid in contended {
                    excluded.insert(gid);
                }
                if pool.iter().all(|c| excluded.contains(&c.group_id)) {
                    BUILDER_FAILURES_TOTAL.with_label_values(&["locks_exhausted"]).inc();
                    return Err(
                        "Not enough valid dcs and/or groups to select from for the given couple"
                            .to_string(),
                    );
                }
                continue;
            }
            Err(e) => {
                BUILDER_FAILURES_TOTAL.with_label_values(&["lock_service_error"]).inc();
                return Err(format!("lock service error: {e}"));
            }
        }
    }
}

/// Builds `options.couples` couples of size `options.size`, trying the
/// whole request under one non-blocking `cluster` lock (spec §4.F, §5).
pub async fn build_couples(
    collaborators: &Collaborators,
    options: &BuildOptions,
    groups_by_total_space: &HashMap<u64, Vec<UncoupledCandidate>>,
    levels: &[String],
    dc_depth: usize,
    accounting: &NsAccounting,
) -> Result<Vec<Result<BuildOutcome, String>>, StormError> {
    options.validate()?;

    match collaborators.lock.acquire(CLUSTER_LOCK_ID).await? {
        true => {}
        false => {
            CLUSTER_LOCK_CONTENDED_TOTAL.inc();
            return Err(StormError::LockBusy(CLUSTER_LOCK_ID.to_string()));
        }
    }

    let mut results = Vec::with_capacity(options.couples);

    for couple_index in 0..options.couples {
        let mandatory = options.mandatory_for(couple_index);
        let pool: Vec<UncoupledCandidate> = if options.match_group_space {
            let bucket_space = mandatory
                .first()
                .and_then(|gid| {
                    groups_by_total_space
                        .iter()
                        .find(|(_, candidates)| candidates.iter().any(|c| c.group_id == *gid))
                        .map(|(space, _)| *space)
                });
            match bucket_space {
                Some(space) => groups_by_total_space.get(&space).cloned().unwrap_or_default(),
                None => groups_by_total_space
                    .values()
                    .max_by_key(|v| v.len())
                    .cloned()
                    .unwrap_or_default(),
            }
        } else {
            groups_by_total_space.values().flatten().cloned().collect()
        };

        let outcome = build_one_couple(
            collaborators,
            options,
            couple_index,
            pool,
            levels,
            dc_depth,
            accounting,
        )
        .await;

        match &outcome {
            Ok(built) => {
                BUILDER_ATTEMPTS_TOTAL
                    .with_label_values(&[if options.dry_run { "dry_run" } else { "ok" }])
                    .inc();
                info!(couple_id = %built.couple_id, "built couple");
            }
            Err(reason) => {
                BUILDER_ATTEMPTS_TOTAL.with_label_values(&["error"]).inc();
                warn!(couple_index, %reason, "couple build failed");
            }
        }
        results.push(outcome);
    }

    if let Err(e) = collaborators.lock.release(CLUSTER_LOCK_ID).await {
        warn!(error = %e, "failed to release cluster lock after build");
    }

    Ok(results)
}
