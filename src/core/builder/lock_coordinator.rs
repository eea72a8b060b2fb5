// src/core/builder/lock_coordinator.rs

//! Per-group distributed locking and the consistent metakey write
//! protocol (spec §4.F, §5): acquire persistent per-group locks, retrying
//! by elimination on contention; verify each group's metakey is empty
//! before writing; roll back best-effort on partial failure.

use crate::core::collaborators::{DistributedLock, STORAGE_KEY_EMPTY, StorageSession};
use crate::core::errors::{StormError, StormResult};
use crate::core::metrics::{GROUP_LOCKS_HELD, GROUP_LOCK_CONTENDED_TOTAL, METAKEY_WRITE_RETRIES_TOTAL};
use std::collections::HashMap;
use tracing::{info, warn};

pub fn group_lock_id(group_id: u64) -> String {
    format!("group/{group_id}")
}

/// Attempts to acquire the per-group lock for every id in `group_ids`.
/// On any contention, releases every lock this call itself acquired (the
/// attempt is abandoned) and returns the contended ids so the caller can
/// exclude them and retry selection (spec §4.F).
pub async fn acquire_group_locks(
    lock: &dyn DistributedLock,
    group_ids: &[u64],
) -> StormResult<Result<(), Vec<u64>>> {
    let mut acquired = Vec::new();
    let mut contended = Vec::new();

    for &gid in group_ids {
        match lock.acquire(&group_lock_id(gid)).await? {
            true => acquired.push(gid),
            false => {
                GROUP_LOCK_CONTENDED_TOTAL.inc();
                contended.push(gid);
            }
        }
    }

    if contended.is_empty() {
        GROUP_LOCKS_HELD.add(acquired.len() as f64);
        return Ok(Ok(()));
    }

    for gid in &acquired {
        let _ = lock.release(&group_lock_id(*gid)).await;
    }
    Ok(Err(contended))
}

/// Releases every group lock in `group_ids`. Release failure is logged
/// as a non-fatal inconsistency (spec §4.F: "Lock release is guaranteed
/// on every exit path... release failure after a successful build is
/// logged as a non-fatal inconsistency").
pub async fn release_group_locks(lock: &dyn DistributedLock, group_ids: &[u64]) {
    for &gid in group_ids {
        if let Err(e) = lock.release(&group_lock_id(gid)).await {
            warn!(group_id = gid, error = %e, "failed to release group lock after build");
        } else {
            GROUP_LOCKS_HELD.sub(1.0);
        }
    }
}

const WRITE_RETRIES: u32 = 3;

/// Writes `metas` (group id → encoded metakey blob) to every involved
/// group. Verifies each group's current metakey is empty
/// (`STORAGE_KEY_EMPTY`) before writing; on partial success, attempts a
/// best-effort rollback of the groups that did accept the write.
/// Regardless of rollback outcome, reports the attempt as failed (spec
/// §4.F, §7).
pub async fn write_metakeys_consistently(
    storage: &dyn StorageSession,
    metas: &HashMap<u64, Vec<u8>>,
) -> StormResult<()> {
    for &gid in metas.keys() {
        let state = storage.probe_key_state(gid).await?;
        if state != STORAGE_KEY_EMPTY {
            return Err(StormError::Transient(format!(
                "group {gid} metakey is not suitable for a fresh write (probe returned {state})"
            )));
        }
    }

    let mut written = Vec::new();
    let mut write_error = None;

    for (&gid, blob) in metas {
        match storage.write_retry(gid, blob.clone(), WRITE_RETRIES).await {
            Ok(()) => {
                METAKEY_WRITE_RETRIES_TOTAL.with_label_values(&["success"]).inc();
                written.push(gid);
            }
            Err(e) => {
                METAKEY_WRITE_RETRIES_TOTAL.with_label_values(&["exhausted"]).inc();
                write_error = Some(e);
                break;
            }
        }
    }

    match write_error {
        None => {
            info!(groups = ?written, "metakey write succeeded for all groups");
            Ok(())
        }
        Some(original_err) => {
            let mut orphans = Vec::new();
            for gid in &written {
                if storage.remove_retry(*gid, WRITE_RETRIES).await.is_err() {
                    orphans.push(*gid);
                }
            }
            if orphans.is_empty() {
                Err(original_err)
            } else {
                Err(StormError::Inconsistency {
                    orphans,
                    reason: format!("metakey write failed after partial success: {original_err}"),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::collaborators::test_doubles::{FakeLock, FakeStorage};

    #[tokio::test]
    async fn acquiring_disjoint_locks_succeeds() {
        let lock = FakeLock::default();
        let result = acquire_group_locks(&lock, &[101, 102, 103]).await.unwrap();
        assert!(result.is_ok());
        for gid in [101, 102, 103] {
            assert!(lock.held(&group_lock_id(gid)).await.unwrap());
        }
    }

    #[tokio::test]
    async fn contention_releases_everything_this_call_acquired() {
        let lock = FakeLock::default();
        lock.acquire(&group_lock_id(102)).await.unwrap();

        let result = acquire_group_locks(&lock, &[101, 102, 103]).await.unwrap();
        assert_eq!(result.unwrap_err(), vec![102]);
        assert!(!lock.held(&group_lock_id(101)).await.unwrap());
        assert!(!lock.held(&group_lock_id(103)).await.unwrap());
        assert!(lock.held(&group_lock_id(102)).await.unwrap());
    }

    #[tokio::test]
    async fn writes_metakey_to_empty_groups() {
        let storage = FakeStorage::default();
        let mut metas = HashMap::new();
        metas.insert(101, b"blob".to_vec());
        assert!(write_metakeys_consistently(&storage, &metas).await.is_ok());
        assert_eq!(storage.read_data(101).await.unwrap(), b"blob".to_vec());
    }

    #[tokio::test]
    async fn refuses_to_write_over_a_nonempty_metakey() {
        let storage = FakeStorage::default();
        storage.write_data(101, b"existing".to_vec()).await.unwrap();
        let mut metas = HashMap::new();
        metas.insert(101, b"blob".to_vec());
        assert!(write_metakeys_consistently(&storage, &metas).await.is_err());
    }
}
