//! Sampling paths and cadence.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

/// Default refresh cadence.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(2);

/// Where to find the pseudo-files and how often to sample them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplerConfig {
    /// Root of the procfs mount.
    pub proc_path: PathBuf,
    /// Root of the sysfs mount.
    pub sys_path: PathBuf,
    pub interval: Duration,
    /// Number of per-core slots; cores beyond this are not reported.
    pub cores: usize,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            proc_path: PathBuf::from("/proc"),
            sys_path: PathBuf::from("/sys"),
            interval: DEFAULT_INTERVAL,
            cores: available_cores(),
        }
    }
}

impl SamplerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_proc_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.proc_path = path.into();
        self
    }

    pub fn with_sys_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.sys_path = path.into();
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_cores(mut self, cores: usize) -> Self {
        self.cores = cores;
        self
    }

    /// Aggregate and per-core time counters.
    pub fn stat_path(&self) -> PathBuf {
        self.proc_path.join("stat")
    }

    pub fn meminfo_path(&self) -> PathBuf {
        self.proc_path.join("meminfo")
    }

    /// Frequency residency table of `core`.
    pub fn time_in_state_path(&self, core: usize) -> PathBuf {
        cpu_dir(&self.sys_path, core).join("cpufreq/stats/time_in_state")
    }
}

fn cpu_dir(sys_path: &Path, core: usize) -> PathBuf {
    sys_path.join(format!("devices/system/cpu/cpu{}", core))
}

/// Processors available to this process, at least 1.
pub fn available_cores() -> usize {
    thread::available_parallelism().map_or(1, |n| n.get())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mock::scenarios::time_in_state_path;

    #[test]
    fn test_defaults() {
        let config = SamplerConfig::default();
        assert_eq!(config.stat_path(), PathBuf::from("/proc/stat"));
        assert_eq!(config.meminfo_path(), PathBuf::from("/proc/meminfo"));
        assert_eq!(config.interval, Duration::from_secs(2));
        assert!(config.cores >= 1);
    }

    #[test]
    fn test_time_in_state_path_matches_mock_layout() {
        let config = SamplerConfig::new().with_sys_path("/sys");
        assert_eq!(
            config.time_in_state_path(3),
            PathBuf::from(time_in_state_path("/sys", 3))
        );
    }

    #[test]
    fn test_custom_roots() {
        let config = SamplerConfig::new()
            .with_proc_path("/host/proc")
            .with_sys_path("/host/sys")
            .with_cores(2);
        assert_eq!(config.stat_path(), PathBuf::from("/host/proc/stat"));
        assert_eq!(
            config.time_in_state_path(0),
            PathBuf::from("/host/sys/devices/system/cpu/cpu0/cpufreq/stats/time_in_state")
        );
        assert_eq!(config.cores, 2);
    }
}
