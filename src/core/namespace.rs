// src/core/namespace.rs

//! The namespace registry: settings validation, namespace↔groupset
//! membership, and soft-delete (spec §4.E).

use crate::core::errors::{StormError, StormResult};
use crate::core::state::ClusterState;
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};
use std::sync::LazyLock;

static TTL_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d+)([smhd])$").unwrap());

/// The closed set of settings keys a namespace may carry (spec §4.E).
/// Nested keys are written dotted (`auth-keys.read`) for whitelist
/// membership checks; the actual document is a nested JSON object.
const WHITELISTED_KEYS: &[&str] = &[
    "success-copies-num",
    "groups-count",
    "static-couple",
    "auth-keys.read",
    "auth-keys.write",
    "signature.token",
    "signature.path_prefix",
    "redirect.content-length-threshold",
    "redirect.expire-time",
    "redirect.query-args",
    "redirect.add-orig-path-query-arg",
    "min-units",
    "add-units",
    "features",
    "reserved-space-percentage",
    "check-for-update",
    "attributes.filename",
    "attributes.ttl.enable",
    "attributes.ttl.minimum",
    "attributes.ttl.maximum",
    "__service.is_deleted",
];

pub struct Namespace {
    pub id: String,
    pub settings: Value,
    pub groupset_ids: BTreeSet<String>,
}

impl Namespace {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            settings: Value::Object(Default::default()),
            groupset_ids: BTreeSet::new(),
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.settings
            .pointer("/__service/is_deleted")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn has_settings(&self) -> bool {
        self.settings.as_object().map(|o| !o.is_empty()).unwrap_or(false)
    }
}

fn dotted_keys(value: &Value, prefix: &str, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                let key = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{prefix}.{k}")
                };
                dotted_keys(v, &key, out);
            }
        }
        _ => out.push(prefix.to_string()),
    }
}

/// `static-couple` must name an existing, fully enumerated,
/// single-namespace couple (spec §4.E): every listed group belongs to the
/// same couple, that couple's full group list matches exactly what was
/// listed, the couple's namespace is this one, and this namespace has no
/// other couple.
fn validate_static_couple(state: &ClusterState, namespace: &str, group_ids: &[u64]) -> StormResult<()> {
    if group_ids.is_empty() {
        return Err(StormError::validation("static-couple must list at least one group"));
    }

    let mut ref_couple_id: Option<String> = None;
    for &gid in group_ids {
        let group = state
            .groups
            .get(&gid)
            .ok_or_else(|| StormError::validation(format!("static-couple group {gid} does not exist")))?;
        let couple_id = group
            .groupset_id
            .as_ref()
            .filter(|id| state.groupsets.left().contains(id))
            .ok_or_else(|| StormError::validation(format!("static-couple group {gid} is not coupled")))?;
        match &ref_couple_id {
            None => ref_couple_id = Some(couple_id.clone()),
            Some(existing) if existing != couple_id => {
                return Err(StormError::validation(
                    "static-couple groups do not all belong to the same couple",
                ));
            }
            _ => {}
        }
    }
    let couple_id = ref_couple_id.unwrap();
    let couple = state.groupsets.left().require(&couple_id)?;

    let listed: HashSet<u64> = group_ids.iter().copied().collect();
    let full: HashSet<u64> = couple.group_ids.iter().copied().collect();
    if listed != full {
        return Err(StormError::validation(format!(
            "static-couple must fully enumerate couple {couple_id}'s groups"
        )));
    }

    if couple.namespace != namespace {
        return Err(StormError::validation(format!(
            "static-couple couple {couple_id} belongs to namespace {}, not {namespace}",
            couple.namespace
        )));
    }

    let has_other_couple = state
        .groupsets
        .left()
        .iter()
        .any(|entry| entry.value().namespace == namespace && *entry.key() != couple_id);
    if has_other_couple {
        return Err(StormError::validation(format!(
            "namespace {namespace} has more than one couple; static-couple requires exactly one"
        )));
    }

    Ok(())
}

/// Validates a namespace settings document against the whitelist and the
/// individual field rules of spec §4.E.
pub fn validate_settings(settings: &Value, state: &ClusterState, namespace: &str) -> StormResult<()> {
    let mut keys = Vec::new();
    dotted_keys(settings, "", &mut keys);
    let allowed: HashSet<&str> = WHITELISTED_KEYS.iter().copied().collect();
    for key in &keys {
        if !allowed.contains(key.as_str()) {
            return Err(StormError::validation(format!(
                "unknown namespace setting key: {key}"
            )));
        }
    }

    if let Some(n) = settings.pointer("/groups-count").and_then(Value::as_i64) {
        if n <= 0 {
            return Err(StormError::validation("groups-count must be a positive integer"));
        }
    }
    if let Some(n) = settings.pointer("/min-units").and_then(Value::as_i64) {
        if n <= 0 {
            return Err(StormError::validation("min-units must be a positive integer"));
        }
    }
    if let Some(n) = settings.pointer("/add-units").and_then(Value::as_i64) {
        if n <= 0 {
            return Err(StormError::validation("add-units must be a positive integer"));
        }
    }

    if let Some(pct) = settings
        .pointer("/reserved-space-percentage")
        .and_then(Value::as_f64)
    {
        if !(0.0..=1.0).contains(&pct) {
            return Err(StormError::validation(
                "reserved-space-percentage must be in [0, 1]",
            ));
        }
    }

    if let Some(scn) = settings.pointer("/success-copies-num").and_then(Value::as_str) {
        if !matches!(scn, "any" | "quorum" | "all") {
            return Err(StormError::validation(
                "success-copies-num must be one of: any, quorum, all",
            ));
        }
    }

    for field in ["/attributes/ttl/minimum", "/attributes/ttl/maximum"] {
        if let Some(ttl) = settings.pointer(field).and_then(Value::as_str) {
            let caps = TTL_PATTERN
                .captures(ttl)
                .ok_or_else(|| StormError::validation(format!("invalid ttl value at {field}: {ttl}")))?;
            let magnitude: u64 = caps[1].parse().unwrap_or(0);
            if magnitude == 0 {
                return Err(StormError::validation(format!(
                    "ttl value at {field} must have a positive magnitude"
                )));
            }
        }
    }

    let token_set = settings.pointer("/signature/token").is_some();
    let path_prefix_set = settings.pointer("/signature/path_prefix").is_some();
    let expire_time_set = settings.pointer("/redirect/expire-time").is_some();
    let all_set = token_set && path_prefix_set && expire_time_set;
    let none_set = !token_set && !path_prefix_set && !expire_time_set;
    if !all_set && !none_set {
        return Err(StormError::validation(
            "signature.token, signature.path_prefix, and redirect.expire-time must be set all-or-none",
        ));
    }

    let ttl_enable = settings
        .pointer("/attributes/ttl/enable")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let check_for_update = settings
        .pointer("/check-for-update")
        .and_then(Value::as_bool)
        .unwrap_or(true);
    if ttl_enable && !check_for_update {
        return Err(StormError::validation(
            "attributes.ttl.enable is incompatible with check-for-update=false",
        ));
    }

    if let Some(group_ids) = settings.pointer("/static-couple").and_then(Value::as_array) {
        let group_ids: Vec<u64> = group_ids.iter().filter_map(Value::as_u64).collect();
        validate_static_couple(state, namespace, &group_ids)?;
    }

    Ok(())
}

/// Generates a fresh 16-hex-character auth secret, used when
/// `auth-keys.{read,write}` is set to the literal `true` (spec §4.E).
pub fn generate_auth_secret() -> String {
    let bytes: [u8; 8] = rand::random();
    hex::encode(bytes)
}

/// Replaces any `auth-keys.{read,write}` value of literal `true` with a
/// fresh secret, in place.
pub fn materialize_auth_keys(settings: &mut Value) {
    for key in ["read", "write"] {
        if let Some(slot) = settings
            .get_mut("auth-keys")
            .and_then(|v| v.as_object_mut())
            .and_then(|o| o.get_mut(key))
        {
            if slot.as_bool() == Some(true) {
                *slot = Value::String(generate_auth_secret());
            }
        }
    }
}

fn merge_dict(base: &mut Value, update: &Value) {
    match (base, update) {
        (Value::Object(base_map), Value::Object(update_map)) => {
            for (k, v) in update_map {
                merge_dict(base_map.entry(k.clone()).or_insert(Value::Null), v);
            }
        }
        (base_slot, update_value) => {
            *base_slot = update_value.clone();
        }
    }
}

/// Applies `update` to a namespace's settings: a deep merge, except when
/// the namespace is currently soft-deleted, in which case `update`
/// replaces the settings wholesale (spec §4.E: "a soft-deleted namespace
/// can be re-created by overwriting settings without merging old
/// values").
pub fn apply_settings_update(namespace: &mut Namespace, update: Value, state: &ClusterState) -> StormResult<()> {
    validate_settings(&update, state, &namespace.id)?;
    let mut merged = update.clone();
    materialize_auth_keys(&mut merged);

    if namespace.is_deleted() {
        namespace.settings = merged;
    } else {
        merge_dict(&mut namespace.settings, &merged);
    }
    Ok(())
}
