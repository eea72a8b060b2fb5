// src/core/errors.rs

//! Defines the primary error type for the entire control plane.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all possible failures within the core.
///
/// Variants map onto the error taxonomy of the specification (kinds, not
/// wire codes): `NotFound`, `Validation`, `LockBusy`, `Transient`,
/// `Inconsistency`, and `CacheUpstreamError`.
#[derive(Error, Debug, Clone)]
pub enum StormError {
    /// A repository lookup miss. Surfaced verbatim to callers.
    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },

    /// Bad input: unknown state, invalid namespace name, bad settings,
    /// invalid confirmation string. Never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// Another builder/mutator holds the `cluster` lock or a per-group lock.
    #[error("lock already acquired: {0}")]
    LockBusy(String),

    /// A storage read/write/remove failed after exhausting retries.
    #[error("transient storage error: {0}")]
    Transient(String),

    /// A metakey write succeeded on some groups and failed on others, and
    /// the best-effort rollback also failed. Fatal for the operation; the
    /// orphaned group ids are reported so an operator can intervene.
    #[error("inconsistent write, orphan groups {orphans:?}: {reason}")]
    Inconsistency { orphans: Vec<u64>, reason: String },

    /// The `InventoryLookup` collaborator is unavailable.
    #[error("inventory upstream unavailable: {0}")]
    CacheUpstream(String),

    /// A programmer error: duplicate keys across a `MultiRepository`'s
    /// sub-repositories, or an invariant violation that should never be
    /// reachable in correct code.
    #[error("internal invariant violated: {0}")]
    Internal(String),

    /// Wraps an I/O failure (e.g. from a config file read). Wrapped in an
    /// `Arc` because `std::io::Error` does not implement `Clone`.
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),
}

impl StormError {
    pub fn not_found(kind: &'static str, key: impl Into<String>) -> Self {
        StormError::NotFound {
            kind,
            key: key.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        StormError::Validation(msg.into())
    }

    /// Whether retrying this operation without changing inputs could
    /// plausibly succeed. Used by callers that loop on transient failures.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StormError::Transient(_) | StormError::LockBusy(_))
    }
}

impl From<std::io::Error> for StormError {
    fn from(e: std::io::Error) -> Self {
        StormError::Io(Arc::new(e))
    }
}

impl From<toml::de::Error> for StormError {
    fn from(e: toml::de::Error) -> Self {
        StormError::Validation(format!("TOML parse error: {e}"))
    }
}

impl From<rmp_serde::encode::Error> for StormError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        StormError::Internal(format!("metakey encode error: {e}"))
    }
}

impl From<rmp_serde::decode::Error> for StormError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        StormError::Validation(format!("metakey decode error: {e}"))
    }
}

pub type StormResult<T> = Result<T, StormError>;
