// src/core/metakey.rs

//! The group metakey: a length-prefixed, msgpack-compatible binary
//! encoding of a versioned metadata document (spec §6). Parsing lifts the
//! legacy bare-tuple form to a `{version:1, ...}` document; `{version:2,
//! ...}` documents are used as-is.

use crate::core::errors::{StormError, StormResult};
use serde::{Deserialize, Serialize};

/// The fixed storage key name every group's metadata is written under.
pub const SYMMETRIC_GROUPS_KEY: &[u8] = b"symmetric_groups";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceStatus {
    pub status: String,
    pub job_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LrcLink {
    pub groups: Vec<u64>,
    pub part_size: u64,
    pub scheme: String,
}

/// The general-purpose document written for data, cache, and LRC member
/// groups alike. `version` discriminates legacy (1) from current (2)
/// documents; fields beyond `couple`/`namespace`/`frozen` are optional and
/// only meaningful for particular group types (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupMeta {
    pub version: u32,
    pub couple: Vec<u64>,
    pub namespace: String,
    pub frozen: bool,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub group_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lrc: Option<LrcLink>,
    /// Present only on `uncoupled_lrc-8-2-2-v1` groups: the full 12-group
    /// scheme order before a groupset has been built around them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lrc_groups: Option<Vec<u64>>,
}

impl GroupMeta {
    pub const DEFAULT_NAMESPACE: &'static str = "default";
    pub const CACHE_NAMESPACE: &'static str = "storage_cache";

    pub fn data(couple: Vec<u64>, namespace: impl Into<String>, frozen: bool) -> Self {
        Self {
            version: 2,
            couple,
            namespace: namespace.into(),
            frozen,
            group_type: Some("data".to_string()),
            service: None,
            lrc: None,
            lrc_groups: None,
        }
    }

    pub fn cache(couple: Vec<u64>) -> Self {
        Self {
            version: 2,
            couple,
            namespace: Self::CACHE_NAMESPACE.to_string(),
            frozen: false,
            group_type: Some("cache".to_string()),
            service: None,
            lrc: None,
            lrc_groups: None,
        }
    }

    pub fn uncoupled_lrc(lrc_groups: Vec<u64>) -> Self {
        Self {
            version: 2,
            couple: Vec::new(),
            namespace: String::new(),
            frozen: false,
            group_type: Some("uncoupled_lrc-8-2-2-v1".to_string()),
            service: None,
            lrc: None,
            lrc_groups: Some(lrc_groups),
        }
    }
}

/// A legacy metakey body: a bare tuple/list of group ids, with no
/// namespace or frozen flag. Lifted to a version-1 `GroupMeta` on parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawMetaBody {
    Legacy(Vec<u64>),
    Versioned(GroupMeta),
}

/// Encodes a `GroupMeta` as a length-prefixed msgpack blob: a 4-byte
/// big-endian length header followed by the msgpack payload.
pub fn encode(meta: &GroupMeta) -> StormResult<Vec<u8>> {
    let payload = rmp_serde::to_vec_named(meta)?;
    let mut out = Vec::with_capacity(4 + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Parses a length-prefixed msgpack blob into a `GroupMeta`, lifting a
/// legacy bare tuple to a version-1 document as needed.
pub fn parse(blob: &[u8]) -> StormResult<GroupMeta> {
    if blob.len() < 4 {
        return Err(StormError::validation(
            "metakey blob shorter than its length header",
        ));
    }
    let len = u32::from_be_bytes([blob[0], blob[1], blob[2], blob[3]]) as usize;
    let payload = blob.get(4..4 + len).ok_or_else(|| {
        StormError::validation("metakey length header does not match payload size")
    })?;

    let body: RawMetaBody = rmp_serde::from_slice(payload)?;
    Ok(match body {
        RawMetaBody::Legacy(couple) => GroupMeta {
            version: 1,
            couple,
            namespace: GroupMeta::DEFAULT_NAMESPACE.to_string(),
            frozen: false,
            group_type: None,
            service: None,
            lrc: None,
            lrc_groups: None,
        },
        RawMetaBody::Versioned(meta) => meta,
    })
}

/// Whether `blob` represents an empty metakey, suitable for a fresh
/// write (spec §4.F: "verify each uncoupled group currently has empty
/// metakey").
pub fn is_empty_blob(blob: &[u8]) -> bool {
    blob.is_empty()
}
