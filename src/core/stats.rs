// src/core/stats.rs

//! Folds raw statistic snapshots into the rolling rates carried by
//! `NodeBackendStat`/`FsStat`/`NodeStat` (spec §4.B).
//!
//! The fold is a **monotone-counter unidirectional map**: a counter that
//! goes backward (wrap or process restart) keeps the previous rate rather
//! than producing a negative one. Deltas under one second are ignored
//! (floor guard) since they make the division numerically unstable.

/// The default staleness threshold, in seconds, after which a backend's
/// last stat is considered stale (spec §4.B, overridable via config).
pub const DEFAULT_STALE_TIMEOUT_SECS: i64 = 120;

/// One side of a monotone counter fold: remembers the previous value and
/// timestamp, and produces a rate on the next `fold`.
#[derive(Debug, Clone, Default)]
pub struct MonotoneCounter {
    previous_value: Option<u64>,
    previous_ts: Option<i64>,
}

impl MonotoneCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds in a new `(value, ts)` observation and returns the updated
    /// rate (bytes, or whatever unit `value` is in, per second). Returns
    /// `None` on the very first observation (no prior point to diff
    /// against) or when `Δt ≤ 1s` (floor guard) or when the counter went
    /// backward (kept rate, i.e. no update — caller keeps its existing
    /// rate value).
    pub fn fold(&mut self, value: u64, ts: i64) -> Option<f64> {
        let result = match (self.previous_value, self.previous_ts) {
            (Some(prev_value), Some(prev_ts)) => {
                let dt = ts - prev_ts;
                if dt <= 1 {
                    None
                } else if value < prev_value {
                    // Counter wrapped or the process restarted: keep the
                    // existing rate rather than producing a negative one.
                    None
                } else {
                    Some((value - prev_value) as f64 / dt as f64)
                }
            }
            _ => None,
        };

        self.previous_value = Some(value);
        self.previous_ts = Some(ts);
        result
    }
}

/// Folds a raw disk-tick snapshot into overall, read, and write disk
/// utilization fractions (spec §4.B):
/// `disk_util = (io_ticks_delta / dt) / 1000`, split by the ratio of
/// `read_ticks` to `read_ticks + write_ticks` deltas.
#[derive(Debug, Clone, Default)]
pub struct DiskUtilFold {
    io_ticks: MonotoneCounter,
    previous_read_ticks: Option<u64>,
    previous_write_ticks: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DiskUtil {
    pub total: f64,
    pub read: f64,
    pub write: f64,
}

impl DiskUtilFold {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fold(&mut self, io_ticks: u64, read_ticks: u64, write_ticks: u64, ts: i64) -> Option<DiskUtil> {
        let total_util = self.io_ticks.fold(io_ticks, ts)? / 1000.0;

        let read_delta = self
            .previous_read_ticks
            .filter(|&prev| read_ticks >= prev)
            .map(|prev| read_ticks - prev)
            .unwrap_or(0);
        let write_delta = self
            .previous_write_ticks
            .filter(|&prev| write_ticks >= prev)
            .map(|prev| write_ticks - prev)
            .unwrap_or(0);

        self.previous_read_ticks = Some(read_ticks);
        self.previous_write_ticks = Some(write_ticks);

        let total_ticks = read_delta + write_delta;
        let read_fraction = if total_ticks == 0 {
            0.5
        } else {
            read_delta as f64 / total_ticks as f64
        };

        Some(DiskUtil {
            total: total_util,
            read: total_util * read_fraction,
            write: total_util * (1.0 - read_fraction),
        })
    }
}

/// Whether a backend whose last stat arrived at `last_ts` is stalled
/// relative to `now` (spec §4.B).
pub fn is_stale(now: i64, last_ts: Option<i64>, stale_timeout_secs: i64) -> bool {
    match last_ts {
        None => true,
        Some(ts) => now.saturating_sub(ts) > stale_timeout_secs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_observation_yields_no_rate() {
        let mut counter = MonotoneCounter::new();
        assert_eq!(counter.fold(100, 10), None);
    }

    #[test]
    fn steady_growth_yields_expected_rate() {
        let mut counter = MonotoneCounter::new();
        counter.fold(100, 0);
        let rate = counter.fold(200, 10).unwrap();
        assert!((rate - 10.0).abs() < 1e-9);
    }

    #[test]
    fn counter_wrap_keeps_existing_rate() {
        let mut counter = MonotoneCounter::new();
        counter.fold(500, 0);
        assert_eq!(counter.fold(10, 10), None);
    }

    #[test]
    fn sub_one_second_delta_is_floored() {
        let mut counter = MonotoneCounter::new();
        counter.fold(100, 0);
        assert_eq!(counter.fold(101, 1), None);
    }

    #[test]
    fn disk_util_splits_by_tick_ratio() {
        let mut fold = DiskUtilFold::new();
        fold.fold(0, 0, 0, 0);
        let util = fold.fold(2000, 600, 400, 10).unwrap();
        assert!((util.total - 0.2).abs() < 1e-9);
        assert!((util.read - 0.12).abs() < 1e-9);
        assert!((util.write - 0.08).abs() < 1e-9);
    }

    #[test]
    fn staleness_uses_floor_of_threshold() {
        assert!(!is_stale(120, Some(0), 120));
        assert!(is_stale(121, Some(0), 120));
        assert!(is_stale(0, None, 120));
    }
}
