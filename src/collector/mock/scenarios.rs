//! Pre-built mock filesystem scenarios for testing.
//!
//! These scenarios provide realistic `/proc` and `/sys` states
//! for testing the samplers under various system conditions.

use super::filesystem::MockFs;

/// Frequencies (kHz) exposed by the mock cores' `time_in_state` tables.
pub const MOCK_FREQS_KHZ: [u64; 3] = [800_000, 1_600_000, 2_400_000];

/// Builds a `/proc/stat` text with an aggregate line and one line per core.
///
/// Each entry is `[user, nice, system, idle, iowait, irq, softirq]`; the
/// aggregate line is the column-wise sum.
pub fn proc_stat(cores: &[[u64; 7]]) -> String {
    let mut total = [0u64; 7];
    for core in cores {
        for (t, v) in total.iter_mut().zip(core) {
            *t += v;
        }
    }
    let mut out = String::new();
    let line = |label: &str, v: &[u64; 7]| {
        format!(
            "{} {} {} {} {} {} {} {} 0 0 0\n",
            label, v[0], v[1], v[2], v[3], v[4], v[5], v[6]
        )
    };
    out.push_str(&line("cpu ", &total));
    for (i, core) in cores.iter().enumerate() {
        out.push_str(&line(&format!("cpu{}", i), core));
    }
    out.push_str("intr 1000000 50 0 0 0\nctxt 500000\nbtime 1700000000\nprocesses 10000\n");
    out.push_str("procs_running 2\nprocs_blocked 0\n");
    out
}

/// Builds a `time_in_state` text from tick counts, one per [`MOCK_FREQS_KHZ`] bucket.
pub fn time_in_state(ticks: [u64; 3]) -> String {
    MOCK_FREQS_KHZ
        .iter()
        .zip(ticks)
        .map(|(f, t)| format!("{} {}\n", f, t))
        .collect()
}

/// Path of a core's frequency residency table below `sys_path`.
pub fn time_in_state_path(sys_path: &str, core: usize) -> String {
    format!(
        "{}/devices/system/cpu/cpu{}/cpufreq/stats/time_in_state",
        sys_path, core
    )
}

impl MockFs {
    /// Creates a typical 4-core system.
    ///
    /// Includes `/proc/stat`, `/proc/meminfo` and a `time_in_state` table for
    /// every core under `/sys`.
    pub fn typical_system() -> Self {
        let fs = Self::new();

        fs.add_file(
            "/proc/stat",
            proc_stat(&[[2500, 125, 750, 20000, 250, 50, 25]; 4]),
        );
        fs.add_file(
            "/proc/meminfo",
            "\
MemTotal:       16384000 kB
MemFree:         8192000 kB
MemAvailable:   12000000 kB
Buffers:          512000 kB
Cached:          2048000 kB
SwapCached:            0 kB
SwapTotal:       4096000 kB
SwapFree:        4096000 kB
HugePages_Total:       0
Hugepagesize:       2048 kB
",
        );
        for core in 0..4 {
            fs.add_file(
                time_in_state_path("/sys", core),
                time_in_state([1000, 500, 250]),
            );
        }

        fs
    }

    /// Creates a 4-core system whose cores expose no frequency tables,
    /// as on most virtual machines.
    pub fn without_cpufreq() -> Self {
        let fs = Self::new();
        fs.add_file(
            "/proc/stat",
            proc_stat(&[[2500, 125, 750, 20000, 250, 50, 25]; 4]),
        );
        fs
    }
}
