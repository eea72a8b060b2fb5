// src/core/collaborators.rs

//! Trait boundaries for the subsystems the core consumes but does not own:
//! inventory lookups, the metadata store, distributed locking, per-group
//! metakey I/O, and the group history log (spec §1, §6; `GroupHistoryLog`
//! is a supplemented feature, see SPEC_FULL.md §B.1).
//!
//! Production implementations of these traits live outside this crate; the
//! in-memory test doubles here back unit tests for the cascades and the
//! builder.

use crate::core::errors::StormResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Resolves host → DC and host → topology-parent-chain. The strict form
/// (`dc_by_host`, `parents_by_host`) surfaces `CacheUpstreamError` on
/// failure; `dc_by_host_lenient` returns `"unknown"` instead (spec §6).
#[async_trait]
pub trait InventoryLookup: Send + Sync {
    async fn dc_by_host(&self, host: &str) -> StormResult<String>;

    async fn parents_by_host(&self, host: &str) -> StormResult<Vec<(String, String)>>;

    async fn dc_by_host_lenient(&self, host: &str) -> String {
        self.dc_by_host(host)
            .await
            .unwrap_or_else(|_| "unknown".to_string())
    }
}

/// Persists namespace settings, group history, couple records, and the
/// cached-key index. Collection availability is configuration-driven
/// (spec §6); a `None` from `collection_enabled` means the caller should
/// skip that piece of persistence rather than fail.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn read_namespace_settings(&self, namespace: &str) -> StormResult<Option<Vec<u8>>>;

    async fn write_namespace_settings(&self, namespace: &str, doc: Vec<u8>) -> StormResult<()>;

    async fn list_namespaces(&self) -> StormResult<Vec<String>>;

    async fn write_couple_record(&self, couple_id: &str, doc: Vec<u8>) -> StormResult<()>;

    async fn remove_couple_record(&self, couple_id: &str) -> StormResult<()>;

    /// Rebuilds the `(cache_key_id, couple_id) -> {data_groups, cache_groups}`
    /// index. Returns the number of entries written.
    async fn rebuild_cached_key_index(
        &self,
        entries: HashMap<String, (String, Vec<u64>, Vec<u64>)>,
    ) -> StormResult<usize>;
}

/// A persistent, cross-process lock service. Locks are identified by
/// string ids (`group/<gid>`, `cluster`, spec §6). Acquisition is
/// non-blocking: it either succeeds immediately or reports contention.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Attempts to acquire `lock_id`. Returns `true` on success, `false`
    /// if another holder already has it.
    async fn acquire(&self, lock_id: &str) -> StormResult<bool>;

    async fn release(&self, lock_id: &str) -> StormResult<()>;

    /// Whether `lock_id` is currently held by anyone (used by the "lock
    /// release" testable property, spec §8).
    async fn held(&self, lock_id: &str) -> StormResult<bool>;
}

/// Sentinel storage return code meaning "key is empty, suitable for a
/// fresh metakey write" (spec §4.F).
pub const STORAGE_KEY_EMPTY: i32 = -2;

/// Reads/writes/removes the per-group metakey blob. `consistent_write`
/// verifies the key is empty (`STORAGE_KEY_EMPTY`) before writing;
/// `write_retry`/`remove_retry` retry up to a bounded count on transient
/// failure (spec §4.F, §5).
#[async_trait]
pub trait StorageSession: Send + Sync {
    async fn read_data(&self, group_id: u64) -> StormResult<Vec<u8>>;

    /// Returns `Ok(STORAGE_KEY_EMPTY)` if the group's metakey is empty and
    /// suitable for a fresh write, or another code if not.
    async fn probe_key_state(&self, group_id: u64) -> StormResult<i32>;

    async fn write_data(&self, group_id: u64, value: Vec<u8>) -> StormResult<()>;

    async fn write_retry(&self, group_id: u64, value: Vec<u8>, retries: u32) -> StormResult<()> {
        let mut last_err = None;
        for _ in 0..retries.max(1) {
            match self.write_data(group_id, value.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() => last_err = Some(e),
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            crate::core::errors::StormError::Transient("write_retry exhausted".to_string())
        }))
    }

    async fn remove(&self, group_id: u64) -> StormResult<()>;

    async fn remove_retry(&self, group_id: u64, retries: u32) -> StormResult<()> {
        let mut last_err = None;
        for _ in 0..retries.max(1) {
            match self.remove(group_id).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() => last_err = Some(e),
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            crate::core::errors::StormError::Transient("remove_retry exhausted".to_string())
        }))
    }
}

/// Records group role transitions for operator visibility. A no-op
/// `NullGroupHistoryLog` backs tests; a real implementation persists into
/// the metadata store's `history` collection (SPEC_FULL.md §B.1).
#[async_trait]
pub trait GroupHistoryLog: Send + Sync {
    async fn record(&self, group_id: u64, event: &str) -> StormResult<()>;
}

pub struct NullGroupHistoryLog;

#[async_trait]
impl GroupHistoryLog for NullGroupHistoryLog {
    async fn record(&self, _group_id: u64, _event: &str) -> StormResult<()> {
        Ok(())
    }
}

/// The bundle of collaborators threaded through the builder and query
/// surface, grouped so call sites take one argument instead of four.
#[derive(Clone)]
pub struct Collaborators {
    pub inventory: Arc<dyn InventoryLookup>,
    pub metadata: Arc<dyn MetadataStore>,
    pub lock: Arc<dyn DistributedLock>,
    pub storage: Arc<dyn StorageSession>,
    pub history: Arc<dyn GroupHistoryLog>,
}
