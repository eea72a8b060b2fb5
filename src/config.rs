// src/config.rs

//! Loads and validates the control plane's configuration: bootstrap storage
//! addresses, metadata-store collections, timeouts, policy toggles, and
//! balancer tuning. Follows the load/resolve/validate split of the teacher
//! codebase's `Config::from_file`.

use crate::core::errors::{StormError, StormResult};
use serde::{Deserialize, Serialize};
use std::fs;
use tracing::warn;

/// Per-subsystem metadata-store collection name. Absent means the
/// subsystem is disabled; callers must check for `None` and log a warning
/// rather than treating an empty string as "no collection" (spec §6).
pub type CollectionName = Option<String>;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MetadataSubsystems {
    #[serde(default)]
    pub jobs: CollectionName,
    #[serde(default)]
    pub external_storage: CollectionName,
    #[serde(default)]
    pub history: CollectionName,
    #[serde(default)]
    pub couples: CollectionName,
    #[serde(default)]
    pub cache: CollectionName,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MetadataConfig {
    #[serde(default)]
    pub nodes: Vec<String>,
    #[serde(default)]
    pub groups: Vec<u64>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub db: MetadataSubsystems,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ElliptictsConfig {
    /// Bootstrap storage addresses. Accepted under either `nodes` or the
    /// legacy flat key `elliptics_nodes` (spec §6); `from_file` reconciles
    /// the two into this single field.
    #[serde(default)]
    pub nodes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalancerConfig {
    #[serde(default = "default_min_units")]
    pub min_units: u32,
    #[serde(default = "default_add_units")]
    pub add_units: u32,
}

fn default_min_units() -> u32 {
    1
}
fn default_add_units() -> u32 {
    1
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            min_units: default_min_units(),
            add_units: default_add_units(),
        }
    }
}

/// Policy toggles consulted by the groupset status cascades and the
/// builder (spec §4.D, §4.F).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub forbidden_dht_groups: bool,
    #[serde(default)]
    pub forbidden_dc_sharing_among_groups: bool,
    #[serde(default)]
    pub forbidden_ns_without_settings: bool,
    #[serde(default)]
    pub forbidden_unmatched_group_total_space: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            forbidden_dht_groups: false,
            forbidden_dc_sharing_among_groups: false,
            forbidden_ns_without_settings: false,
            forbidden_unmatched_group_total_space: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CacheConfig {
    #[serde(default = "default_group_path_prefix")]
    pub group_path_prefix: String,
}

fn default_group_path_prefix() -> String {
    "/srv/storage/cache".to_string()
}

/// Raw shape of the TOML document, before the `elliptics`/`elliptics_nodes`
/// legacy-key reconciliation and validation.
#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    elliptics: ElliptictsConfig,
    #[serde(default)]
    elliptics_nodes: Vec<String>,
    #[serde(default)]
    metadata: MetadataConfig,
    #[serde(default = "default_wait_timeout_secs")]
    wait_timeout: u64,
    #[serde(default = "default_reserved_space")]
    reserved_space: u64,
    #[serde(default = "default_stale_timeout_secs")]
    node_backend_stat_stale_timeout: u64,
    #[serde(default)]
    forbidden_dht_groups: bool,
    #[serde(default)]
    forbidden_dc_sharing_among_groups: bool,
    #[serde(default)]
    forbidden_ns_without_settings: bool,
    #[serde(default)]
    forbidden_unmatched_group_total_space: bool,
    #[serde(default)]
    balancer_config: BalancerConfig,
    #[serde(default = "default_nodes_reload_period_secs")]
    nodes_reload_period: u64,
    #[serde(default = "default_fallback_hosts_per_dc")]
    fallback_hosts_per_dc: u32,
    #[serde(default)]
    cache: CacheConfig,
    #[serde(default = "default_log_level")]
    log_level: String,
}

fn default_wait_timeout_secs() -> u64 {
    5
}
/// ~105 GiB, the teacher's ballpark VFS reserve for a storage backend.
fn default_reserved_space() -> u64 {
    105 * 1024 * 1024 * 1024
}
fn default_stale_timeout_secs() -> u64 {
    120
}
fn default_nodes_reload_period_secs() -> u64 {
    60
}
fn default_fallback_hosts_per_dc() -> u32 {
    2
}
fn default_log_level() -> String {
    "info".to_string()
}

/// The resolved, validated configuration used throughout the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub elliptics_nodes: Vec<String>,
    pub metadata: MetadataConfig,
    pub wait_timeout_secs: u64,
    pub reserved_space: u64,
    pub node_backend_stat_stale_timeout_secs: u64,
    pub policy: PolicyConfig,
    pub balancer_config: BalancerConfig,
    pub nodes_reload_period_secs: u64,
    pub fallback_hosts_per_dc: u32,
    pub cache: CacheConfig,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            elliptics_nodes: Vec::new(),
            metadata: MetadataConfig::default(),
            wait_timeout_secs: default_wait_timeout_secs(),
            reserved_space: default_reserved_space(),
            node_backend_stat_stale_timeout_secs: default_stale_timeout_secs(),
            policy: PolicyConfig::default(),
            balancer_config: BalancerConfig::default(),
            nodes_reload_period_secs: default_nodes_reload_period_secs(),
            fallback_hosts_per_dc: default_fallback_hosts_per_dc(),
            cache: CacheConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Reads and parses a TOML file, reconciles the legacy
    /// `elliptics_nodes` flat key, then validates.
    pub fn from_file(path: &str) -> StormResult<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_str(&contents)
    }

    pub fn from_str(contents: &str) -> StormResult<Self> {
        let raw: RawConfig = toml::from_str(contents)?;

        let mut elliptics_nodes = raw.elliptics.nodes;
        if elliptics_nodes.is_empty() {
            elliptics_nodes = raw.elliptics_nodes;
        }

        let config = Config {
            elliptics_nodes,
            metadata: raw.metadata,
            wait_timeout_secs: raw.wait_timeout,
            reserved_space: raw.reserved_space,
            node_backend_stat_stale_timeout_secs: raw.node_backend_stat_stale_timeout,
            policy: PolicyConfig {
                forbidden_dht_groups: raw.forbidden_dht_groups,
                forbidden_dc_sharing_among_groups: raw.forbidden_dc_sharing_among_groups,
                forbidden_ns_without_settings: raw.forbidden_ns_without_settings,
                forbidden_unmatched_group_total_space: raw.forbidden_unmatched_group_total_space,
            },
            balancer_config: raw.balancer_config,
            nodes_reload_period_secs: raw.nodes_reload_period,
            fallback_hosts_per_dc: raw.fallback_hosts_per_dc,
            cache: raw.cache,
            log_level: raw.log_level,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> StormResult<()> {
        if self.wait_timeout_secs == 0 {
            return Err(StormError::validation("wait_timeout cannot be 0"));
        }
        if self.node_backend_stat_stale_timeout_secs == 0 {
            return Err(StormError::validation(
                "node_backend_stat_stale_timeout cannot be 0",
            ));
        }
        if self.balancer_config.min_units == 0 {
            return Err(StormError::validation(
                "balancer_config.min_units cannot be 0",
            ));
        }
        if self.fallback_hosts_per_dc == 0 {
            warn!("fallback_hosts_per_dc is 0: no fallback hosts will ever be offered");
        }

        if self.metadata.db.jobs.is_none() {
            warn!("metadata.db.jobs not configured: job-aware status escalation is disabled");
        }
        if self.metadata.db.external_storage.is_none() {
            warn!("metadata.db.external_storage not configured: external storage subsystem is disabled");
        }
        if self.metadata.db.history.is_none() {
            warn!("metadata.db.history not configured: group history log is disabled");
        }
        if self.metadata.db.couples.is_none() {
            warn!("metadata.db.couples not configured: couple persistence is disabled");
        }
        if self.metadata.db.cache.is_none() {
            warn!("metadata.db.cache not configured: cached-key index is disabled");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn legacy_elliptics_nodes_key_is_honored() {
        let toml = r#"
            elliptics_nodes = ["host1:1025:10", "host2:1025:10"]
        "#;
        let config = Config::from_str(toml).unwrap();
        assert_eq!(config.elliptics_nodes.len(), 2);
    }

    #[test]
    fn nested_elliptics_nodes_key_takes_precedence() {
        let toml = r#"
            elliptics_nodes = ["legacy:1025:10"]
            [elliptics]
            nodes = ["host1:1025:10"]
        "#;
        let config = Config::from_str(toml).unwrap();
        assert_eq!(config.elliptics_nodes, vec!["host1:1025:10".to_string()]);
    }

    #[test]
    fn zero_wait_timeout_is_rejected() {
        let toml = "wait_timeout = 0";
        assert!(Config::from_str(toml).is_err());
    }
}
