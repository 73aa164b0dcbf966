//! CPU statistics aggregator.
//!
//! One engine samples `/proc/stat` (aggregate line plus one line per core),
//! one more engine per core samples its `time_in_state` table. A refresh fans
//! out to all of them and a [`CompletionBarrier`] joins the completions; the
//! last one derives the report and runs the caller's callback.

use std::borrow::Cow;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use arc_swap::ArcSwap;
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::collector::barrier::CompletionBarrier;
use crate::collector::dispatch::Dispatcher;
use crate::collector::engine::{Generation, SamplingEngine, SnapshotReader, TableLayout};
use crate::collector::error::CollectError;
use crate::collector::freq::{FreqSampler, FreqTable, scale_between};
use crate::collector::traits::FileSystem;
use crate::config::SamplerConfig;
use crate::rates::{COUNTER_FIELDS, CoreDelta, CpuCounters, FreqScale, elapsed_ms};
use crate::table::{CellBounds, TextTable};

/// Row labels of the report table.
pub const ROW_LABELS: [&str; 11] = [
    "cpu", "user", "nice", "system", "idle", "iowait", "irq", "softirq", "load", "freq", "scaled",
];

/// Widest value any report cell renders.
const WIDEST_CELL: &str = "100.00%";

/// Label plus the seven counters; steal and guest columns are ignored.
const STAT_COLUMNS: usize = 1 + COUNTER_FIELDS;

/// Derived metrics of one refresh cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CpuReport {
    /// `/proc/stat` read this report was derived from; 0 before the first.
    pub sequence: u64,
    /// Unix seconds.
    pub collected_at: i64,
    /// Window the rates cover.
    pub elapsed_ms: u64,
    /// Aggregate line first, then one entry per configured core.
    pub cores: Vec<CoreDelta>,
}

impl CpuReport {
    fn empty(cores: usize) -> Self {
        let mut entries = Vec::with_capacity(cores + 1);
        entries.push(CoreDelta::default());
        entries.extend((0..cores).map(CoreDelta::offline));
        Self {
            cores: entries,
            ..Self::default()
        }
    }

    pub fn aggregate(&self) -> Option<&CoreDelta> {
        self.cores.first()
    }

    pub fn core(&self, cpu: usize) -> Option<&CoreDelta> {
        self.cores.get(cpu + 1)
    }
}

impl TextTable for CpuReport {
    fn column_count(&self) -> usize {
        1 + self.cores.len()
    }

    fn row_count(&self) -> usize {
        ROW_LABELS.len()
    }

    fn cell_text(&self, col: usize, row: usize) -> Cow<'_, str> {
        if col == 0 {
            return Cow::Borrowed(ROW_LABELS.get(row).copied().unwrap_or(""));
        }
        let Some(d) = self.cores.get(col - 1) else {
            return Cow::Borrowed("");
        };
        if row == 0 {
            return match d.cpu {
                None => Cow::Borrowed("all"),
                Some(cpu) => Cow::Owned(cpu.to_string()),
            };
        }
        if !d.online {
            return Cow::Borrowed("-");
        }
        let rates = d.rates.to_array();
        match row {
            1..=7 => Cow::Owned(rates[row - 1].to_string()),
            8 => Cow::Owned(format!("{:.1}%", d.load)),
            9 => match d.freq {
                Some(f) => Cow::Owned(format!("{}MHz", f.avg_hz / 1_000_000)),
                None => Cow::Borrowed("-"),
            },
            10 => Cow::Owned(format!("{:.1}%", d.scaled_load)),
            _ => Cow::Borrowed(""),
        }
    }

    /// Every cell is measured as the widest possible value so the layout
    /// does not jitter between refreshes.
    fn measure_all_cells(&self, metric: &dyn Fn(&str) -> CellBounds) -> Vec<CellBounds> {
        vec![metric(WIDEST_CELL); self.column_count()]
    }
}

/// Counters and frequency tables of the two most recent reads.
struct History {
    /// Slot 0 is the aggregate line, slot `n + 1` is core `n`.
    current: Vec<Option<CpuCounters>>,
    previous: Vec<Option<CpuCounters>>,
    captured_at: Option<Instant>,
    previous_at: Option<Instant>,
    sequence: u64,
    freq_current: Vec<FreqTable>,
    freq_previous: Vec<FreqTable>,
    scales: Vec<Option<FreqScale>>,
}

impl History {
    fn new(cores: usize) -> Self {
        Self {
            current: vec![None; cores + 1],
            previous: vec![None; cores + 1],
            captured_at: None,
            previous_at: None,
            sequence: 0,
            freq_current: vec![FreqTable::default(); cores],
            freq_previous: vec![FreqTable::default(); cores],
            scales: vec![None; cores],
        }
    }
}

/// State the barrier's completion needs to derive a report.
struct Aggregation {
    stat_path: PathBuf,
    stat: SnapshotReader,
    /// `(core, time_in_state path, reader)` for cores with frequency data.
    freqs: Vec<(usize, PathBuf, SnapshotReader)>,
    history: Mutex<History>,
    report: Arc<ArcSwap<CpuReport>>,
    failed: AtomicBool,
}

impl Aggregation {
    fn update(&self) -> Result<(), CollectError> {
        let generation = self.stat.load();
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        if generation.sequence() == history.sequence {
            return Ok(());
        }
        let History {
            current,
            previous,
            captured_at,
            previous_at,
            sequence,
            freq_current,
            freq_previous,
            scales,
        } = &mut *history;

        std::mem::swap(current, previous);
        *previous_at = *captured_at;
        *captured_at = generation.captured_at();
        *sequence = generation.sequence();
        parse_counters(&generation, current).map_err(|source| CollectError::Format {
            path: self.stat_path.clone(),
            source,
        })?;

        for (cpu, path, reader) in &self.freqs {
            let cpu = *cpu;
            std::mem::swap(&mut freq_current[cpu], &mut freq_previous[cpu]);
            freq_current[cpu].load(&reader.load(), path)?;
            scales[cpu] = scale_between(&freq_previous[cpu], &freq_current[cpu], cpu)?;
        }

        let ms = match (*previous_at, *captured_at) {
            (Some(earlier), Some(later)) => elapsed_ms(earlier, later),
            _ => 0,
        };
        let report = CpuReport {
            sequence: *sequence,
            collected_at: unix_now(),
            elapsed_ms: ms,
            cores: derive_cores(previous, current, ms, scales),
        };
        debug!(
            sequence = report.sequence,
            elapsed_ms = ms,
            load = report.aggregate().map_or(0.0, |d| d.load),
            "cpu report updated"
        );
        self.report.store(Arc::new(report));
        Ok(())
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Fills `slots` from the cpu lines of a `/proc/stat` generation. Slots whose
/// line is absent are left `None`; lines past the slot count are ignored.
fn parse_counters(
    generation: &Generation,
    slots: &mut [Option<CpuCounters>],
) -> Result<(), crate::collector::procfs::ParseError> {
    slots.fill(None);
    let table = generation.table();
    let text = generation.text();
    for row in 0..table.row_count() {
        let Some(slot) = slot_of(table.cell(text, 0, row)) else {
            continue;
        };
        if slot >= slots.len() {
            continue;
        }
        let mut values = [0u64; COUNTER_FIELDS];
        for (i, v) in values.iter_mut().enumerate() {
            *v = table.parse_u64(text, i + 1, row)?;
        }
        slots[slot] = Some(CpuCounters::from_array(values));
    }
    Ok(())
}

/// `cpu` maps to slot 0, `cpuN` to slot `N + 1`.
fn slot_of(label: &str) -> Option<usize> {
    let suffix = label.strip_prefix("cpu")?;
    if suffix.is_empty() {
        return Some(0);
    }
    suffix.parse::<usize>().ok().map(|n| n + 1)
}

/// Per-slot deltas over a window of `ms`. A slot without a previous capture
/// reports zero rates; a slot without a current one is offline.
fn derive_cores(
    previous: &[Option<CpuCounters>],
    current: &[Option<CpuCounters>],
    ms: u64,
    scales: &[Option<FreqScale>],
) -> Vec<CoreDelta> {
    current
        .iter()
        .enumerate()
        .map(|(slot, curr)| {
            let cpu = slot.checked_sub(1);
            let freq = match cpu {
                None => average_scale(scales),
                Some(cpu) => scales.get(cpu).copied().flatten(),
            };
            match (curr, previous.get(slot).copied().flatten()) {
                (None, _) => match cpu {
                    Some(cpu) => CoreDelta::offline(cpu),
                    None => CoreDelta::default(),
                },
                (Some(curr), Some(prev)) => CoreDelta::between(cpu, &prev, curr, ms, freq),
                (Some(curr), None) => CoreDelta::between(cpu, curr, curr, 0, freq),
            }
        })
        .collect()
}

/// Mean of the per-core frequency statistics, for the aggregate line.
fn average_scale(scales: &[Option<FreqScale>]) -> Option<FreqScale> {
    let (count, avg_hz, max_hz, scale) = scales.iter().flatten().fold(
        (0usize, 0.0f64, 0u64, 0.0f64),
        |(n, avg, max, scale), f| (n + 1, avg + f.avg_hz as f64, max.max(f.max_hz), scale + f.scale),
    );
    if count == 0 {
        return None;
    }
    let n = count as f64;
    Some(FreqScale {
        avg_hz: (avg_hz / n) as u64,
        max_hz,
        scale: scale / n,
    })
}

/// Samples aggregate and per-core CPU statistics.
pub struct CpuSampler<F: FileSystem + Clone> {
    fs: F,
    config: SamplerConfig,
    dispatcher: Arc<dyn Dispatcher>,
    stat: SamplingEngine<F>,
    freqs: Vec<FreqSampler<F>>,
    aggregation: Option<Arc<Aggregation>>,
    report: Arc<ArcSwap<CpuReport>>,
}

impl<F: FileSystem + Clone> CpuSampler<F> {
    pub fn new(fs: F, config: SamplerConfig, dispatcher: Arc<dyn Dispatcher>) -> Self {
        let layout = TableLayout::whitespace(STAT_COLUMNS).with_row_limit(config.cores + 1);
        let stat = SamplingEngine::new(fs.clone(), layout, Arc::clone(&dispatcher));
        let report = Arc::new(ArcSwap::from_pointee(CpuReport::empty(config.cores)));
        Self {
            fs,
            config,
            dispatcher,
            stat,
            freqs: Vec::new(),
            aggregation: None,
            report,
        }
    }

    /// Opens `/proc/stat` and every core's `time_in_state`. Cores without
    /// a readable residency table are sampled without frequency data.
    pub fn open(&mut self) -> Result<(), CollectError> {
        if self.aggregation.is_some() {
            return Err(CollectError::AlreadyOpen {
                path: self.config.stat_path(),
            });
        }
        let stat_path = self.config.stat_path();
        self.stat.open(&stat_path)?;

        let mut missing = 0;
        for cpu in 0..self.config.cores {
            let path = self.config.time_in_state_path(cpu);
            if !self.fs.exists(&path) {
                missing += 1;
                continue;
            }
            let mut sampler =
                FreqSampler::new(self.fs.clone(), cpu, path, Arc::clone(&self.dispatcher));
            match sampler.open() {
                Ok(()) => self.freqs.push(sampler),
                Err(e @ CollectError::Open { .. }) => {
                    warn!("cpu{}: frequency sampling disabled: {}", cpu, e);
                    missing += 1;
                }
                Err(e) => {
                    let _ = self.close_engines();
                    return Err(e);
                }
            }
        }
        if missing > 0 {
            warn!(
                "{} of {} cores expose no cpufreq residency table; scaled load equals load there",
                missing, self.config.cores
            );
        }

        self.aggregation = Some(Arc::new(Aggregation {
            stat_path,
            stat: self.stat.reader(),
            freqs: self
                .freqs
                .iter()
                .map(|f| (f.cpu(), f.path().to_path_buf(), f.reader()))
                .collect(),
            history: Mutex::new(History::new(self.config.cores)),
            report: Arc::clone(&self.report),
            failed: AtomicBool::new(false),
        }));
        debug!(
            cores = self.config.cores,
            freq_engines = self.freqs.len(),
            "cpu sampler opened"
        );
        Ok(())
    }

    /// Refreshes all engines concurrently. `callback` runs once, after the
    /// last of them completed and the report was derived.
    ///
    /// An engine refusing the refresh counts as a failed completion, so the
    /// callback may then run before this returns.
    pub fn refresh(
        &self,
        callback: impl FnOnce(Result<(), CollectError>) + Send + 'static,
    ) -> Result<(), CollectError> {
        let Some(aggregation) = &self.aggregation else {
            return Err(CollectError::NotOpen);
        };
        if aggregation.failed.load(Ordering::Acquire) {
            return Err(CollectError::Stopped {
                path: aggregation.stat_path.clone(),
            });
        }

        let joined = Arc::clone(aggregation);
        let barrier = Arc::new(CompletionBarrier::new(
            1 + self.freqs.len(),
            Box::new(move |result: Result<(), CollectError>| {
                let result = result.and_then(|()| joined.update());
                if let Err(e) = &result {
                    error!("cpu sampling stopped: {}", e);
                    joined.failed.store(true, Ordering::Release);
                }
                callback(result);
            }),
        ));

        if let Err(e) = self.stat.refresh(party(&barrier)) {
            barrier.complete(Err(e));
        }
        for freq in &self.freqs {
            if let Err(e) = freq.refresh(party(&barrier)) {
                barrier.complete(Err(e));
            }
        }
        Ok(())
    }

    /// Closes every engine. Returns the first close error.
    pub fn close(&mut self) -> Result<(), CollectError> {
        self.aggregation = None;
        self.close_engines()
    }

    fn close_engines(&mut self) -> Result<(), CollectError> {
        let mut first = self.stat.close().err();
        for mut freq in self.freqs.drain(..) {
            if let Err(e) = freq.close() {
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }

    pub fn is_open(&self) -> bool {
        self.aggregation.is_some()
    }

    /// Latest derived report. Never blocks.
    pub fn report(&self) -> Arc<CpuReport> {
        self.report.load_full()
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Cores sampled with frequency data.
    pub fn frequency_cores(&self) -> Vec<usize> {
        self.freqs.iter().map(|f| f.cpu()).collect()
    }
}

fn party(barrier: &Arc<CompletionBarrier>) -> impl FnOnce(Result<(), CollectError>) + Send + 'static {
    let barrier = Arc::clone(barrier);
    move |result| barrier.complete(result)
}
