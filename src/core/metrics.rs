// src/core/metrics.rs

//! Defines and registers Prometheus metrics for the control plane.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only
//! once globally for the entire application lifecycle.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, Histogram, TextEncoder, register_counter, register_counter_vec,
    register_gauge, register_histogram,
};

lazy_static! {
    // --- Lock contention ---
    /// The total number of `cluster` lock acquisitions that failed fast
    /// because another mutator already held it.
    pub static ref CLUSTER_LOCK_CONTENDED_TOTAL: Counter =
        register_counter!("stormcore_cluster_lock_contended_total", "Total number of non-blocking cluster lock acquisitions that failed fast.").unwrap();
    /// The total number of per-group lock acquisitions that failed because
    /// the group was already locked by another builder attempt.
    pub static ref GROUP_LOCK_CONTENDED_TOTAL: Counter =
        register_counter!("stormcore_group_lock_contended_total", "Total number of per-group lock acquisitions that failed.").unwrap();
    /// Current count of per-group locks held by in-flight builder attempts.
    pub static ref GROUP_LOCKS_HELD: Gauge =
        register_gauge!("stormcore_group_locks_held", "Number of per-group distributed locks currently held.").unwrap();

    // --- Builder ---
    /// Total couple-build attempts, labeled by outcome (`ok`, `error`, `dry_run`).
    pub static ref BUILDER_ATTEMPTS_TOTAL: CounterVec =
        register_counter_vec!("stormcore_builder_attempts_total", "Total couple-build attempts, labeled by outcome.", &["outcome"]).unwrap();
    /// Total couple-build failures, labeled by the reason category.
    pub static ref BUILDER_FAILURES_TOTAL: CounterVec =
        register_counter_vec!("stormcore_builder_failures_total", "Total couple-build failures, labeled by reason.", &["reason"]).unwrap();
    /// Latency of a single couple-build selection pass.
    pub static ref BUILDER_SELECTION_LATENCY_SECONDS: Histogram =
        register_histogram!("stormcore_builder_selection_latency_seconds", "Latency of the topological selection algorithm in seconds.").unwrap();

    // --- Status cascades ---
    /// Total status-cascade invocations, labeled by entity kind (`group`,
    /// `couple`, `lrc`).
    pub static ref STATUS_CASCADE_INVOCATIONS_TOTAL: CounterVec =
        register_counter_vec!("stormcore_status_cascade_invocations_total", "Total status cascade invocations, labeled by entity kind.", &["kind"]).unwrap();

    // --- Backend staleness ---
    /// Current count of node backends considered stalled (stat age over
    /// the configured staleness threshold).
    pub static ref STALE_BACKENDS: Gauge =
        register_gauge!("stormcore_stale_backends", "Number of node backends whose last stat is older than the staleness threshold.").unwrap();

    // --- Metadata store / inventory ---
    /// Total metakey write retries, labeled by outcome (`success`,
    /// `exhausted`).
    pub static ref METAKEY_WRITE_RETRIES_TOTAL: CounterVec =
        register_counter_vec!("stormcore_metakey_write_retries_total", "Total metakey write retry attempts, labeled by outcome.", &["outcome"]).unwrap();
    /// Total inventory lookup failures surfaced as `CacheUpstreamError`.
    pub static ref INVENTORY_LOOKUP_FAILURES_TOTAL: Counter =
        register_counter!("stormcore_inventory_lookup_failures_total", "Total inventory lookup failures.").unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families).unwrap()
}
