// src/core/topology.rs

//! The physical topology entities: hosts, nodes, filesystems, and node
//! backends, plus their ownership links (spec §3, §4.A).

use crate::core::stats::{DiskUtilFold, MonotoneCounter};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// An address, its resolved hostname, and the node list it owns.
/// Equality by address (spec §3).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HostAddr(pub String);

#[derive(Debug, Clone)]
pub struct Host {
    pub addr: HostAddr,
    pub hostname: Option<String>,
    /// Topology parent chain, outermost first: `[("dc", "dc1"), ("row",
    /// "row3"), ("rack", "rack7")]`, resolved lazily via `InventoryLookup`.
    pub parents: Vec<(String, String)>,
    pub nodes: BTreeSet<String>,
}

impl Host {
    pub fn new(addr: HostAddr) -> Self {
        Self {
            addr,
            hostname: None,
            parents: Vec::new(),
            nodes: BTreeSet::new(),
        }
    }

    pub fn dc(&self) -> Option<&str> {
        self.parents
            .iter()
            .find(|(kind, _)| kind == "dc")
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeFamily {
    Ipv4,
    Ipv6,
}

/// A process endpoint `(host, port, family)` on some host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeKey {
    pub host: HostAddr,
    pub port: u16,
    pub family: NodeFamily,
}

impl std::fmt::Display for NodeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host.0, self.port)
    }
}

/// Aggregated per-node command statistics, rolled up from its backends.
/// The rate fields are folded from `disk_read_bytes`/`disk_write_bytes`
/// raw counters carried by a `NodeSnapshot`, not stored themselves.
#[derive(Debug, Clone, Default)]
pub struct CommandStat {
    pub disk_read_time_ms: u64,
    pub disk_write_time_ms: u64,
    pub disk_read_rate_bytes_per_sec: f64,
    pub disk_write_rate_bytes_per_sec: f64,
}

#[derive(Debug, Clone, Default)]
pub struct NodeStat {
    pub load_average: f64,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub tx_rate_bytes_per_sec: f64,
    pub rx_rate_bytes_per_sec: f64,
    pub command_stat: CommandStat,
    pub last_collect_ts: Option<i64>,
}

/// A raw per-collection-cycle snapshot for one node (spec §4.B: "Accept a
/// raw stat snapshot ..., update rolling rates"). Counters are
/// cumulative since node start, as reported by the collector.
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeSnapshot {
    pub load_average: f64,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub disk_read_bytes: u64,
    pub disk_write_bytes: u64,
    pub disk_read_time_ms: u64,
    pub disk_write_time_ms: u64,
    pub collect_ts: i64,
}

#[derive(Debug, Clone, Default)]
struct NodeStatFold {
    tx: MonotoneCounter,
    rx: MonotoneCounter,
    disk_read: MonotoneCounter,
    disk_write: MonotoneCounter,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub key: NodeKey,
    pub stat: NodeStat,
    pub backends: BTreeSet<String>,
    fold: NodeStatFold,
}

impl Node {
    pub fn new(key: NodeKey) -> Self {
        Self {
            key,
            stat: NodeStat::default(),
            backends: BTreeSet::new(),
            fold: NodeStatFold::default(),
        }
    }

    /// Folds a raw snapshot into `stat`'s rolling rates, keeping the
    /// previous rate on a non-advancing or sub-floor delta (spec §4.B).
    pub fn apply_snapshot(&mut self, snapshot: NodeSnapshot) {
        self.stat.load_average = snapshot.load_average;
        self.stat.tx_bytes = snapshot.tx_bytes;
        self.stat.rx_bytes = snapshot.rx_bytes;
        self.stat.command_stat.disk_read_time_ms = snapshot.disk_read_time_ms;
        self.stat.command_stat.disk_write_time_ms = snapshot.disk_write_time_ms;

        if let Some(rate) = self.fold.tx.fold(snapshot.tx_bytes, snapshot.collect_ts) {
            self.stat.tx_rate_bytes_per_sec = rate;
        }
        if let Some(rate) = self.fold.rx.fold(snapshot.rx_bytes, snapshot.collect_ts) {
            self.stat.rx_rate_bytes_per_sec = rate;
        }
        if let Some(rate) = self.fold.disk_read.fold(snapshot.disk_read_bytes, snapshot.collect_ts) {
            self.stat.command_stat.disk_read_rate_bytes_per_sec = rate;
        }
        if let Some(rate) = self.fold.disk_write.fold(snapshot.disk_write_bytes, snapshot.collect_ts) {
            self.stat.command_stat.disk_write_rate_bytes_per_sec = rate;
        }
        self.stat.last_collect_ts = Some(snapshot.collect_ts);
    }
}

/// `(host, fsid)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FsKey {
    pub host: HostAddr,
    pub fsid: String,
}

impl std::fmt::Display for FsKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host.0, self.fsid)
    }
}

#[derive(Debug, Clone, Default)]
pub struct FsStat {
    pub vfs_total_space: u64,
    pub vfs_free_space: u64,
    pub io_ticks: u64,
    pub read_ticks: u64,
    pub write_ticks: u64,
    pub read_sectors: u64,
    pub write_sectors: u64,
    /// `(io_ticks_delta / dt) / 1000`, see `crate::core::stats`.
    pub disk_util: f64,
    pub disk_util_read: f64,
    pub disk_util_write: f64,
    pub read_rate_bytes_per_sec: f64,
    pub write_rate_bytes_per_sec: f64,
    pub last_collect_ts: Option<i64>,
}

/// A raw per-collection-cycle snapshot for one filesystem (spec §4.B).
/// Sector counts are in the conventional 512-byte unit.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsSnapshot {
    pub vfs_total_space: u64,
    pub vfs_free_space: u64,
    pub io_ticks: u64,
    pub read_ticks: u64,
    pub write_ticks: u64,
    pub read_sectors: u64,
    pub write_sectors: u64,
    pub collect_ts: i64,
}

const SECTOR_BYTES: u64 = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsStatus {
    Ok,
    Broken,
}

#[derive(Debug, Clone, Default)]
struct FsStatFold {
    disk_util: DiskUtilFold,
    read_bytes: MonotoneCounter,
    write_bytes: MonotoneCounter,
}

#[derive(Debug, Clone)]
pub struct Filesystem {
    pub key: FsKey,
    pub stat: FsStat,
    pub node_backends: BTreeSet<String>,
    fold: FsStatFold,
}

impl Filesystem {
    pub fn new(key: FsKey) -> Self {
        Self {
            key,
            stat: FsStat::default(),
            node_backends: BTreeSet::new(),
            fold: FsStatFold::default(),
        }
    }

    /// OK unless the sum of owned backends' advertised `total_space`
    /// exceeds the VFS total (spec §3: misconfiguration).
    pub fn status(&self, owned_total_space: u64) -> FsStatus {
        if owned_total_space > self.stat.vfs_total_space {
            FsStatus::Broken
        } else {
            FsStatus::Ok
        }
    }

    /// Folds a raw snapshot into `stat`'s disk utilization and I/O rate
    /// fields, keeping the previous values on a non-advancing or
    /// sub-floor delta (spec §4.B).
    pub fn apply_snapshot(&mut self, snapshot: FsSnapshot) {
        self.stat.vfs_total_space = snapshot.vfs_total_space;
        self.stat.vfs_free_space = snapshot.vfs_free_space;
        self.stat.io_ticks = snapshot.io_ticks;
        self.stat.read_ticks = snapshot.read_ticks;
        self.stat.write_ticks = snapshot.write_ticks;
        self.stat.read_sectors = snapshot.read_sectors;
        self.stat.write_sectors = snapshot.write_sectors;

        if let Some(util) = self.fold.disk_util.fold(
            snapshot.io_ticks,
            snapshot.read_ticks,
            snapshot.write_ticks,
            snapshot.collect_ts,
        ) {
            self.stat.disk_util = util.total;
            self.stat.disk_util_read = util.read;
            self.stat.disk_util_write = util.write;
        }
        if let Some(rate) = self
            .fold
            .read_bytes
            .fold(snapshot.read_sectors * SECTOR_BYTES, snapshot.collect_ts)
        {
            self.stat.read_rate_bytes_per_sec = rate;
        }
        if let Some(rate) = self
            .fold
            .write_bytes
            .fold(snapshot.write_sectors * SECTOR_BYTES, snapshot.collect_ts)
        {
            self.stat.write_rate_bytes_per_sec = rate;
        }
        self.stat.last_collect_ts = Some(snapshot.collect_ts);
    }
}

/// `(node, backend_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackendKey {
    pub node: NodeKey,
    pub backend_id: u32,
}

impl std::fmt::Display for BackendKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.node, self.backend_id)
    }
}

#[derive(Debug, Clone, Default)]
pub struct NodeBackendStat {
    pub total_space: u64,
    pub free_space: u64,
    pub used_space: u64,
    pub vfs_total_space: u64,
    pub vfs_free_space: u64,
    pub vfs_used_space: u64,
    pub records_total: u64,
    pub records_removed: u64,
    pub records_removed_size: u64,
    pub fragmentation: f64,
    pub want_defrag: u32,
    pub blob_size_limit: u64,
    pub blob_size: u64,
    pub blocking_queue_size: u32,
    pub nonblocking_queue_size: u32,
    pub backend_start_ts: i64,
    pub stat_commit_errors: u32,
    pub last_collect_ts: Option<i64>,
}

impl NodeBackendStat {
    /// `total_space - ceil(VFS_RESERVED * total/vfs_total)` (spec §3).
    pub fn effective_space(&self, vfs_reserved: u64) -> u64 {
        if self.vfs_total_space == 0 {
            return self.total_space;
        }
        let reserved = ((vfs_reserved as u128 * self.total_space as u128)
            .div_ceil(self.vfs_total_space as u128)) as u64;
        self.total_space.saturating_sub(reserved)
    }

    pub fn effective_free_space(&self, vfs_reserved: u64) -> u64 {
        let eff_total = self.effective_space(vfs_reserved);
        let used = self.total_space.saturating_sub(self.free_space);
        eff_total.saturating_sub(used)
    }

    /// A backend is full once its used space reaches the reserved-space
    /// margin of its effective capacity, or it has no effective free
    /// space left at all (spec §4.D.6, namespace `reserved-space-percentage`).
    pub fn is_full(&self, vfs_reserved: u64, reserved_space_percentage: f64) -> bool {
        let eff_space = self.effective_space(vfs_reserved) as f64;
        if self.used_space as f64 >= eff_space * (1.0 - reserved_space_percentage) {
            return true;
        }
        self.effective_free_space(vfs_reserved) == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeBackendStatus {
    Init,
    Ok,
    Ro,
    Stalled,
    Broken,
}

#[derive(Debug, Clone)]
pub struct NodeBackend {
    pub key: BackendKey,
    pub fs: Option<FsKey>,
    pub group_id: Option<u64>,
    pub stat: NodeBackendStat,
    pub disabled: bool,
    pub read_only: bool,
}

impl NodeBackend {
    /// Applies a raw per-backend stat snapshot (spec §4.B). Every field
    /// on `NodeBackendStat` is an instantaneous gauge rather than a
    /// monotone counter, so the snapshot replaces the prior stat outright
    /// instead of folding a rate.
    pub fn apply_snapshot(&mut self, stat: NodeBackendStat) {
        self.stat = stat;
    }

    pub fn new(key: BackendKey) -> Self {
        Self {
            key,
            fs: None,
            group_id: None,
            stat: NodeBackendStat::default(),
            disabled: false,
            read_only: false,
        }
    }

    /// `now - stat.ts > stale_timeout` (spec §4.B).
    pub fn is_stalled(&self, now: i64, stale_timeout_secs: i64) -> bool {
        match self.stat.last_collect_ts {
            None => true,
            Some(ts) => now.saturating_sub(ts) > stale_timeout_secs,
        }
    }

    pub fn status(&self, now: i64, stale_timeout_secs: i64) -> NodeBackendStatus {
        if self.stat.last_collect_ts.is_none() {
            return NodeBackendStatus::Init;
        }
        if self.is_stalled(now, stale_timeout_secs) {
            return NodeBackendStatus::Stalled;
        }
        if self.disabled {
            return NodeBackendStatus::Broken;
        }
        if self.read_only {
            return NodeBackendStatus::Ro;
        }
        NodeBackendStatus::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fs_is_broken_when_owned_space_exceeds_vfs() {
        let mut fs = Filesystem::new(FsKey {
            host: HostAddr("h1".to_string()),
            fsid: "fs0".to_string(),
        });
        fs.stat.vfs_total_space = 100;
        assert_eq!(fs.status(50), FsStatus::Ok);
        assert_eq!(fs.status(200), FsStatus::Broken);
    }

    #[test]
    fn backend_effective_space_subtracts_proportional_reserve() {
        let mut backend = NodeBackend::new(BackendKey {
            node: NodeKey {
                host: HostAddr("h1".to_string()),
                port: 1025,
                family: NodeFamily::Ipv4,
            },
            backend_id: 0,
        });
        backend.stat.total_space = 1000;
        backend.stat.vfs_total_space = 1000;
        assert_eq!(backend.stat.effective_space(100), 900);
    }

    #[test]
    fn backend_is_full_when_used_space_crosses_reserved_margin() {
        let mut stat = NodeBackendStat::default();
        stat.total_space = 1000;
        stat.vfs_total_space = 1000;
        stat.free_space = 300;
        stat.used_space = 700;

        assert!(!stat.is_full(0, 0.25));
        stat.used_space = 760;
        stat.free_space = 240;
        assert!(stat.is_full(0, 0.25));
    }

    #[test]
    fn backend_is_full_when_no_effective_free_space_remains() {
        let mut stat = NodeBackendStat::default();
        stat.total_space = 1000;
        stat.vfs_total_space = 1000;
        stat.free_space = 0;
        stat.used_space = 1000;

        assert!(stat.is_full(0, 0.0));
    }

    #[test]
    fn backend_without_stat_is_init() {
        let backend = NodeBackend::new(BackendKey {
            node: NodeKey {
                host: HostAddr("h1".to_string()),
                port: 1025,
                family: NodeFamily::Ipv4,
            },
            backend_id: 0,
        });
        assert_eq!(backend.status(1000, 120), NodeBackendStatus::Init);
    }

    #[test]
    fn backend_becomes_stalled_after_threshold() {
        let mut backend = NodeBackend::new(BackendKey {
            node: NodeKey {
                host: HostAddr("h1".to_string()),
                port: 1025,
                family: NodeFamily::Ipv4,
            },
            backend_id: 0,
        });
        backend.stat.last_collect_ts = Some(0);
        assert_eq!(backend.status(121, 120), NodeBackendStatus::Stalled);
        assert_eq!(backend.status(119, 120), NodeBackendStatus::Ok);
    }

    #[test]
    fn backend_apply_snapshot_replaces_the_gauge_stat() {
        let mut backend = NodeBackend::new(BackendKey {
            node: NodeKey {
                host: HostAddr("h1".to_string()),
                port: 1025,
                family: NodeFamily::Ipv4,
            },
            backend_id: 0,
        });
        let mut stat = NodeBackendStat::default();
        stat.total_space = 500;
        stat.last_collect_ts = Some(42);
        backend.apply_snapshot(stat);
        assert_eq!(backend.stat.total_space, 500);
        assert_eq!(backend.status(42, 120), NodeBackendStatus::Ok);
    }

    #[test]
    fn node_apply_snapshot_folds_rates_after_second_observation() {
        let mut node = Node::new(NodeKey {
            host: HostAddr("h1".to_string()),
            port: 1025,
            family: NodeFamily::Ipv4,
        });
        node.apply_snapshot(NodeSnapshot {
            load_average: 0.5,
            tx_bytes: 1000,
            rx_bytes: 2000,
            disk_read_bytes: 500,
            disk_write_bytes: 300,
            disk_read_time_ms: 10,
            disk_write_time_ms: 20,
            collect_ts: 0,
        });
        assert_eq!(node.stat.tx_rate_bytes_per_sec, 0.0);

        node.apply_snapshot(NodeSnapshot {
            load_average: 0.7,
            tx_bytes: 1500,
            rx_bytes: 2400,
            disk_read_bytes: 1500,
            disk_write_bytes: 800,
            disk_read_time_ms: 15,
            disk_write_time_ms: 25,
            collect_ts: 10,
        });
        assert!((node.stat.tx_rate_bytes_per_sec - 50.0).abs() < 1e-9);
        assert!((node.stat.rx_rate_bytes_per_sec - 40.0).abs() < 1e-9);
        assert!((node.stat.command_stat.disk_read_rate_bytes_per_sec - 100.0).abs() < 1e-9);
        assert!((node.stat.command_stat.disk_write_rate_bytes_per_sec - 50.0).abs() < 1e-9);
        assert_eq!(node.stat.command_stat.disk_read_time_ms, 15);
    }

    #[test]
    fn node_apply_snapshot_keeps_prior_rate_on_counter_wrap() {
        let mut node = Node::new(NodeKey {
            host: HostAddr("h1".to_string()),
            port: 1025,
            family: NodeFamily::Ipv4,
        });
        node.apply_snapshot(NodeSnapshot {
            tx_bytes: 1000,
            collect_ts: 0,
            ..Default::default()
        });
        node.apply_snapshot(NodeSnapshot {
            tx_bytes: 2000,
            collect_ts: 10,
            ..Default::default()
        });
        let rate_before_wrap = node.stat.tx_rate_bytes_per_sec;

        node.apply_snapshot(NodeSnapshot {
            tx_bytes: 100,
            collect_ts: 20,
            ..Default::default()
        });
        assert_eq!(node.stat.tx_rate_bytes_per_sec, rate_before_wrap);
        assert_eq!(node.stat.tx_bytes, 100);
    }

    #[test]
    fn filesystem_apply_snapshot_folds_disk_util_and_io_rates() {
        let mut fs = Filesystem::new(FsKey {
            host: HostAddr("h1".to_string()),
            fsid: "fs0".to_string(),
        });
        fs.apply_snapshot(FsSnapshot {
            vfs_total_space: 1000,
            vfs_free_space: 500,
            io_ticks: 0,
            read_ticks: 0,
            write_ticks: 0,
            read_sectors: 0,
            write_sectors: 0,
            collect_ts: 0,
        });
        fs.apply_snapshot(FsSnapshot {
            vfs_total_space: 1000,
            vfs_free_space: 400,
            io_ticks: 2000,
            read_ticks: 600,
            write_ticks: 400,
            read_sectors: 100,
            write_sectors: 50,
            collect_ts: 10,
        });

        assert!((fs.stat.disk_util - 0.2).abs() < 1e-9);
        assert!((fs.stat.disk_util_read - 0.12).abs() < 1e-9);
        assert!((fs.stat.disk_util_write - 0.08).abs() < 1e-9);
        assert!((fs.stat.read_rate_bytes_per_sec - (100.0 * 512.0 / 10.0)).abs() < 1e-9);
        assert!((fs.stat.write_rate_bytes_per_sec - (50.0 * 512.0 / 10.0)).abs() < 1e-9);
        assert_eq!(fs.stat.vfs_free_space, 400);
    }
}
