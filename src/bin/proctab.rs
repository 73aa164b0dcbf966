//! proctab - periodic CPU and memory sampler.
//!
//! Samples `/proc/stat`, per-core cpufreq residency and optionally
//! `/proc/meminfo` on background workers and prints one report per interval,
//! as an aligned table or as JSON lines.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use chrono::{Local, TimeZone};
use clap::Parser;
use serde_json::{Map, Value, json};
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use proctab::collector::{CollectError, CpuReport, CpuSampler, DispatchQueue, FileSystem, MemInfo};
#[cfg(target_os = "linux")]
use proctab::collector::RealFs;
#[cfg(not(target_os = "linux"))]
use proctab::collector::mock::MockFs;
use proctab::config::{SamplerConfig, available_cores};
use proctab::table::render_plain;

/// How often the main loop wakes up to check for Ctrl-C.
const POLL: Duration = Duration::from_millis(100);

/// meminfo keys shown in table output.
const MEMINFO_KEYS: [&str; 5] = ["MemTotal", "MemFree", "MemAvailable", "Cached", "SwapFree"];

/// Periodic CPU and memory sampler.
#[derive(Parser)]
#[command(name = "proctab", about = "Periodic CPU and memory sampler", version)]
struct Args {
    /// Sampling interval in seconds.
    #[arg(short, long, default_value = "2")]
    interval: u64,

    /// Path to /proc filesystem (for testing/mocking).
    #[arg(long, default_value = "/proc")]
    proc_path: PathBuf,

    /// Path to /sys filesystem (for testing/mocking).
    #[arg(long, default_value = "/sys")]
    sys_path: PathBuf,

    /// Number of cores to report. Defaults to the available parallelism.
    #[arg(long)]
    cores: Option<usize>,

    /// Exit after printing this many reports.
    #[arg(short = 'n', long)]
    count: Option<u64>,

    /// Print one JSON object per report instead of a table.
    #[arg(long)]
    json: bool,

    /// Also sample /proc/meminfo.
    #[arg(short, long)]
    meminfo: bool,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

/// Initializes tracing subscriber with appropriate log level.
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = format!("proctab={}", level).parse() {
        filter = filter.add_directive(directive);
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[derive(Debug, Clone, Copy)]
enum Source {
    Cpu,
    MemInfo,
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    let config = SamplerConfig::new()
        .with_proc_path(&args.proc_path)
        .with_sys_path(&args.sys_path)
        .with_interval(Duration::from_secs(args.interval.max(1)))
        .with_cores(args.cores.unwrap_or_else(available_cores));

    info!("proctab {} starting", env!("CARGO_PKG_VERSION"));
    info!(
        "Config: interval={}s, cores={}, proc={}, sys={}",
        config.interval.as_secs(),
        config.cores,
        config.proc_path.display(),
        config.sys_path.display()
    );

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    }) {
        warn!("Failed to set Ctrl-C handler: {}", e);
    }

    #[cfg(target_os = "linux")]
    let fs = RealFs::new();
    #[cfg(not(target_os = "linux"))]
    let fs = MockFs::typical_system();

    if let Err(e) = run(fs, config, &args, &running) {
        error!("{}", e);
        process::exit(1);
    }
    info!("proctab stopped");
}

fn run<F: FileSystem + Clone>(
    fs: F,
    config: SamplerConfig,
    args: &Args,
    running: &AtomicBool,
) -> Result<(), CollectError> {
    let queue = DispatchQueue::new();
    let mut cpu = CpuSampler::new(fs.clone(), config.clone(), Arc::new(queue.handle()));
    cpu.open()?;
    let mut meminfo = if args.meminfo {
        let mut mem = MemInfo::new(fs, config.meminfo_path(), Arc::new(queue.handle()));
        mem.open()?;
        Some(mem)
    } else {
        None
    };

    let result = sample_loop(&queue, &cpu, meminfo.as_ref(), &config, args, running);

    let closed = cpu.close();
    if let Some(mem) = meminfo.as_mut()
        && let Err(e) = mem.close()
    {
        warn!("failed to close meminfo sampler: {}", e);
    }
    result.and(closed)
}

fn sample_loop<F: FileSystem + Clone>(
    queue: &DispatchQueue,
    cpu: &CpuSampler<F>,
    meminfo: Option<&MemInfo<F>>,
    config: &SamplerConfig,
    args: &Args,
    running: &AtomicBool,
) -> Result<(), CollectError> {
    let (done_tx, done_rx) = mpsc::channel::<(Source, Result<(), CollectError>)>();
    let mut cycles: u64 = 0;
    let mut printed: u64 = 0;

    while running.load(Ordering::SeqCst) {
        let started = Instant::now();

        let tx = done_tx.clone();
        cpu.refresh(move |result| {
            let _ = tx.send((Source::Cpu, result));
        })?;
        let mut pending = 1;
        if let Some(mem) = meminfo {
            let tx = done_tx.clone();
            mem.refresh(move |result| {
                let _ = tx.send((Source::MemInfo, result));
            })?;
            pending += 1;
        }

        while pending > 0 && running.load(Ordering::SeqCst) {
            queue.run_for(POLL);
            while let Ok((source, result)) = done_rx.try_recv() {
                pending -= 1;
                if let Err(e) = result {
                    error!("{:?} sampling failed", source);
                    return Err(e);
                }
            }
        }
        if pending > 0 {
            break;
        }

        cycles += 1;
        let report = cpu.report();
        // The first cycle only primes the counters.
        if cycles > 1 {
            let line = if args.json {
                json_report(&report, meminfo)
            } else {
                table_report(&report, meminfo)
            };
            println!("{}", line);
            printed += 1;
            if args.count.is_some_and(|n| printed >= n) {
                break;
            }
        } else {
            debug!("primed {} cores", report.cores.len().saturating_sub(1));
        }

        let mut remaining = config.interval.saturating_sub(started.elapsed());
        while remaining > Duration::ZERO && running.load(Ordering::SeqCst) {
            let sleep_time = remaining.min(POLL);
            std::thread::sleep(sleep_time);
            remaining = remaining.saturating_sub(sleep_time);
        }
    }
    Ok(())
}

fn table_report<F: FileSystem>(report: &CpuReport, meminfo: Option<&MemInfo<F>>) -> String {
    let time = Local
        .timestamp_opt(report.collected_at, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default();
    let mut out = format!("{}  window {}ms\n", time, report.elapsed_ms);
    out.push_str(&render_plain(report));
    if let Some(mem) = meminfo {
        for key in MEMINFO_KEYS {
            match mem.value_kb(key) {
                Ok(Some(kb)) => out.push_str(&format!("{:<14}{:>12} kB\n", format!("{}:", key), kb)),
                Ok(None) => {}
                Err(e) => warn!("{}", e),
            }
        }
    }
    out.trim_end().to_string()
}

fn json_report<F: FileSystem>(report: &CpuReport, meminfo: Option<&MemInfo<F>>) -> String {
    let mut value = json!({
        "timestamp": report.collected_at,
        "cpu": report,
    });
    if let Some(mem) = meminfo {
        let snapshot = mem.snapshot();
        let mut fields = Map::new();
        for row in 0..snapshot.row_count() {
            let key = snapshot.cell_text(0, row).trim_end_matches(':');
            if let Ok(n) = snapshot.cell_text(1, row).parse::<u64>() {
                fields.insert(key.to_string(), Value::from(n));
            }
        }
        value["meminfo"] = Value::Object(fields);
    }
    value.to_string()
}
