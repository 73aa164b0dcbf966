//! Counter delta, load and frequency-scale math for CPU sampling.
//!
//! Everything here is pure: the samplers capture cumulative counters and
//! timestamps, these functions turn two captures into display values.

use serde::Serialize;

// ---------------------------------------------------------------------------
// Cumulative counters
// ---------------------------------------------------------------------------

/// Number of counter columns read from a `/proc/stat` cpu line.
pub const COUNTER_FIELDS: usize = 7;

/// Names of the counter columns, in `/proc/stat` order.
pub const COUNTER_NAMES: [&str; COUNTER_FIELDS] =
    ["user", "nice", "system", "idle", "iowait", "irq", "softirq"];

/// Cumulative time counters of one cpu line, in USER_HZ ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CpuCounters {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
}

impl CpuCounters {
    pub fn from_array(v: [u64; COUNTER_FIELDS]) -> Self {
        Self {
            user: v[0],
            nice: v[1],
            system: v[2],
            idle: v[3],
            iowait: v[4],
            irq: v[5],
            softirq: v[6],
        }
    }

    pub fn to_array(self) -> [u64; COUNTER_FIELDS] {
        [
            self.user,
            self.nice,
            self.system,
            self.idle,
            self.iowait,
            self.irq,
            self.softirq,
        ]
    }

    /// Ticks spent doing work.
    pub fn busy(&self) -> u64 {
        self.user + self.nice + self.system + self.irq + self.softirq
    }

    /// Ticks spent idle, including waiting on I/O.
    pub fn idle_all(&self) -> u64 {
        self.idle + self.iowait
    }

    /// Field-wise `self - earlier`. A counter that went backwards (cpu
    /// hotplug resets it) yields 0.
    pub fn delta(&self, earlier: &CpuCounters) -> CpuCounters {
        let (a, b) = (self.to_array(), earlier.to_array());
        let mut out = [0u64; COUNTER_FIELDS];
        for i in 0..COUNTER_FIELDS {
            out[i] = a[i].saturating_sub(b[i]);
        }
        Self::from_array(out)
    }
}

// ---------------------------------------------------------------------------
// Rates and load
// ---------------------------------------------------------------------------

/// Whole milliseconds between two captures, 0 if `later` is not after `earlier`.
pub fn elapsed_ms(earlier: std::time::Instant, later: std::time::Instant) -> u64 {
    later
        .checked_duration_since(earlier)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Converts a counter delta to ticks per second: `delta * 1000 / ms`.
///
/// All rates are zero when `ms` is zero.
pub fn counter_rates(delta: &CpuCounters, ms: u64) -> CpuCounters {
    if ms == 0 {
        return CpuCounters::default();
    }
    let mut out = delta.to_array();
    for v in &mut out {
        *v = v.saturating_mul(1000) / ms;
    }
    CpuCounters::from_array(out)
}

/// Busy share of a counter delta, as a percentage rounded to one decimal.
///
/// Returns 0 when no ticks elapsed at all.
pub fn load_percent(delta: &CpuCounters) -> f64 {
    let busy = delta.busy();
    let total = busy + delta.idle_all();
    if total == 0 {
        return 0.0;
    }
    round1(busy as f64 * 100.0 / total as f64)
}

/// Load adjusted for running below maximum frequency, rounded to one decimal.
pub fn scaled_load(load: f64, scale: f64) -> f64 {
    round1(scale * load)
}

/// Rounds to one decimal place, half away from zero.
fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

// ---------------------------------------------------------------------------
// Frequency scale
// ---------------------------------------------------------------------------

/// Frequency statistics of one core over a sampling window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FreqScale {
    /// Residency-weighted average frequency, Hz.
    pub avg_hz: u64,
    /// Highest frequency in the residency table, Hz.
    pub max_hz: u64,
    /// `avg_hz / max_hz`, in `0.0..=1.0`.
    pub scale: f64,
}

/// Computes the frequency scale from `(khz, tick delta)` pairs.
///
/// Returns `None` when no ticks elapsed or the table has no non-zero
/// frequency.
pub fn freq_scale(buckets: impl IntoIterator<Item = (u64, u64)>) -> Option<FreqScale> {
    let mut cycles: u128 = 0;
    let mut ticks: u128 = 0;
    let mut max_khz = 0u64;
    for (khz, dt) in buckets {
        cycles += u128::from(khz) * u128::from(dt);
        ticks += u128::from(dt);
        max_khz = max_khz.max(khz);
    }
    if ticks == 0 || max_khz == 0 {
        return None;
    }
    let avg_khz = cycles / ticks;
    Some(FreqScale {
        avg_hz: u64::try_from(avg_khz * 1000).unwrap_or(u64::MAX),
        max_hz: max_khz.saturating_mul(1000),
        scale: cycles as f64 / (max_khz as f64 * ticks as f64),
    })
}

// ---------------------------------------------------------------------------
// Per-core result
// ---------------------------------------------------------------------------

/// Derived metrics of one `/proc/stat` cpu line over the last window.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CoreDelta {
    /// `None` for the aggregate line.
    pub cpu: Option<usize>,
    /// False when the core's line was missing from the latest read.
    pub online: bool,
    /// Ticks per second for each counter.
    pub rates: CpuCounters,
    /// Busy percentage, one decimal.
    pub load: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub freq: Option<FreqScale>,
    /// `load` scaled by `freq.scale`; equals `load` without frequency data.
    pub scaled_load: f64,
}

impl CoreDelta {
    /// Computes the delta between two captures taken `ms` milliseconds apart.
    pub fn between(
        cpu: Option<usize>,
        previous: &CpuCounters,
        current: &CpuCounters,
        ms: u64,
        freq: Option<FreqScale>,
    ) -> Self {
        if ms == 0 {
            return Self {
                cpu,
                online: true,
                freq,
                ..Self::default()
            };
        }
        let delta = current.delta(previous);
        let load = load_percent(&delta);
        Self {
            cpu,
            online: true,
            rates: counter_rates(&delta, ms),
            load,
            scaled_load: freq.map_or(load, |f| scaled_load(load, f.scale)),
            freq,
        }
    }

    /// A core that did not appear in the latest read.
    pub fn offline(cpu: usize) -> Self {
        Self {
            cpu: Some(cpu),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn counters(user: u64, system: u64, idle: u64) -> CpuCounters {
        CpuCounters {
            user,
            system,
            idle,
            ..CpuCounters::default()
        }
    }

    #[test]
    fn test_rate_per_second() {
        let prev = counters(100, 0, 0);
        let curr = counters(150, 0, 0);
        let rates = counter_rates(&curr.delta(&prev), 500);
        assert_eq!(rates.user, 100);
    }

    #[test]
    fn test_zero_elapsed_gives_zero_rates() {
        let d = CoreDelta::between(None, &counters(0, 0, 0), &counters(50, 10, 10), 0, None);
        assert_eq!(d.rates, CpuCounters::default());
        assert_eq!(d.load, 0.0);
        assert_eq!(d.scaled_load, 0.0);
    }

    #[test]
    fn test_load_boundaries() {
        assert_eq!(load_percent(&CpuCounters::default()), 0.0);
        assert_eq!(load_percent(&counters(500, 0, 500)), 50.0);
        assert_eq!(load_percent(&counters(0, 0, 700)), 0.0);
        assert_eq!(load_percent(&counters(10, 0, 0)), 100.0);
    }

    #[test]
    fn test_load_rounds_to_one_decimal() {
        // 150 busy / 350 total = 42.857%
        let d = counters(100, 50, 200);
        assert_eq!(load_percent(&d), 42.9);
    }

    #[test]
    fn test_core_delta_end_to_end_numbers() {
        let prev = CpuCounters::default();
        let curr = counters(100, 50, 200);
        let d = CoreDelta::between(None, &prev, &curr, 1000, None);
        assert_eq!(d.rates.user, 100);
        assert_eq!(d.rates.system, 50);
        assert_eq!(d.rates.idle, 200);
        assert_eq!(d.load, 42.9);
        assert_eq!(d.scaled_load, 42.9);
        assert!(d.online);
    }

    #[test]
    fn test_counter_regression_saturates() {
        let d = counters(10, 0, 0).delta(&counters(20, 0, 0));
        assert_eq!(d.user, 0);
    }

    #[test]
    fn test_elapsed_ms() {
        let t0 = Instant::now();
        let t1 = t0 + Duration::from_millis(1500);
        assert_eq!(elapsed_ms(t0, t1), 1500);
        assert_eq!(elapsed_ms(t1, t0), 0);
    }

    #[test]
    fn test_freq_scale() {
        // Half the window at 1 GHz, half at 2 GHz: average 1.5 GHz of 2 GHz.
        let f = freq_scale([(1_000_000, 50), (2_000_000, 50)]).unwrap();
        assert_eq!(f.avg_hz, 1_500_000_000);
        assert_eq!(f.max_hz, 2_000_000_000);
        assert!((f.scale - 0.75).abs() < 1e-9);
        assert_eq!(scaled_load(80.0, f.scale), 60.0);
    }

    #[test]
    fn test_freq_scale_needs_ticks() {
        assert!(freq_scale([(1_000_000, 0), (2_000_000, 0)]).is_none());
        assert!(freq_scale(std::iter::empty()).is_none());
    }

    #[test]
    fn test_scaled_load_follows_scale() {
        let f = freq_scale([(800_000, 0), (1_600_000, 100)]).unwrap();
        let d = CoreDelta::between(Some(0), &counters(0, 0, 0), &counters(50, 0, 50), 1000, Some(f));
        assert_eq!(d.load, 50.0);
        assert_eq!(d.scaled_load, 50.0);

        let f = freq_scale([(800_000, 100), (1_600_000, 0)]).unwrap();
        let d = CoreDelta::between(Some(0), &counters(0, 0, 0), &counters(50, 0, 50), 1000, Some(f));
        assert_eq!(d.scaled_load, 25.0);
    }
}
