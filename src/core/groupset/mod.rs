// src/core/groupset/mod.rs

//! The shared groupset contract (spec §4.D, §9 design note: "model as a
//! tagged variant or a small capability interface — not inheritance") and
//! helpers common to both groupset variants.

pub mod lrc;
pub mod replicas;

use crate::core::errors::StormResult;
use crate::core::metakey::GroupMeta;
use crate::core::status::GroupsetCascadeResult;
use std::collections::HashMap;

/// Meta keys ignored when comparing two group metas for equality across a
/// groupset (spec §4.D: "groups' metas differ on any non-negligible key").
pub const NEGLIGIBLE_META_KEYS: &[&str] = &["service", "version"];

/// Whether `a` and `b` agree on every key but the negligible ones.
pub fn metas_agree(a: &GroupMeta, b: &GroupMeta) -> bool {
    a.couple == b.couple
        && a.namespace == b.namespace
        && a.frozen == b.frozen
        && a.group_type == b.group_type
        && a.lrc == b.lrc
        && a.lrc_groups == b.lrc_groups
}

/// A host partitioned view: one primary host per distinct host among the
/// groupset's backends, plus fallback hosts (lowest load-average in each
/// used DC, capped per DC) (spec §3).
#[derive(Debug, Clone, Default)]
pub struct HostsView {
    pub primary: Vec<String>,
    pub fallback: Vec<String>,
}

/// Inputs shared by both groupset cascades: the namespace's settings
/// presence, DC membership per group (for the DC-sharing check), and
/// per-group broken-ness as already derived by the group cascade.
pub struct GroupsetCascadeCommon<'a> {
    pub namespace_has_settings: bool,
    pub is_cache_namespace: bool,
    pub group_dcs: Vec<&'a str>,
    pub any_group_broken: bool,
    pub forbidden_dc_sharing_among_groups: bool,
    pub forbidden_ns_without_settings: bool,
}

impl<'a> GroupsetCascadeCommon<'a> {
    /// Settings checks shared by both cascades (spec §4.D.3): namespace
    /// has no settings and isn't the cache namespace while that policy is
    /// enforced, or DC-sharing is forbidden and violated, or any member
    /// group is broken.
    pub fn broken_reason(&self) -> Option<&'static str> {
        if self.forbidden_ns_without_settings && !self.namespace_has_settings && !self.is_cache_namespace {
            return Some("Namespace has no settings");
        }
        if self.forbidden_dc_sharing_among_groups && has_duplicate_dc(&self.group_dcs) {
            return Some("Some groups of the groupset are on the same DC");
        }
        if self.any_group_broken {
            return Some("Some groups of the groupset are in state BROKEN");
        }
        None
    }
}

fn has_duplicate_dc(dcs: &[&str]) -> bool {
    let mut seen = std::collections::HashSet::new();
    dcs.iter().any(|dc| !seen.insert(*dc))
}

/// The shared capability every groupset variant exposes. Kept as a small
/// trait rather than an inheritance hierarchy per spec §9.
pub trait Groupset {
    fn groupset_id(&self) -> &str;

    fn update_status(&self) -> GroupsetCascadeResult;

    fn compose_group_meta(&self, frozen: bool) -> HashMap<u64, GroupMeta>;

    fn effective_space(&self, per_group: impl Fn(u64) -> u64) -> u64
    where
        Self: Sized,
    {
        self.group_ids().iter().map(|&gid| per_group(gid)).sum()
    }

    fn group_ids(&self) -> Vec<u64>;

    fn check_groups(&self) -> StormResult<()>;

    fn check_settings(&self) -> StormResult<()>;

    fn groupset_settings(&self) -> &HashMap<String, String>;
}
