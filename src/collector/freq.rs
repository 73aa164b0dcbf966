//! Per-core frequency residency sampling.
//!
//! `cpufreq/stats/time_in_state` lists one `<kHz> <ticks>` pair per line,
//! where ticks accumulate while the core runs at that frequency. Two reads
//! give the residency-weighted average frequency over the window between
//! them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::collector::dispatch::Dispatcher;
use crate::collector::engine::{Generation, SamplingEngine, SnapshotReader, TableLayout};
use crate::collector::error::CollectError;
use crate::collector::traits::FileSystem;
use crate::rates::{FreqScale, freq_scale};

/// Cumulative ticks per frequency bucket, in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FreqTable {
    buckets: Vec<(u64, u64)>,
}

impl FreqTable {
    pub fn new(buckets: Vec<(u64, u64)>) -> Self {
        Self { buckets }
    }

    /// `(kHz, ticks)` pairs.
    pub fn buckets(&self) -> &[(u64, u64)] {
        &self.buckets
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn total_ticks(&self) -> u64 {
        self.buckets.iter().map(|&(_, t)| t).sum()
    }

    /// Refills the table from a parsed `time_in_state` generation. Lines
    /// without a frequency are skipped.
    pub fn load(&mut self, generation: &Generation, path: &Path) -> Result<(), CollectError> {
        self.buckets.clear();
        let table = generation.table();
        let text = generation.text();
        for row in 0..table.row_count() {
            if table.cell(text, 0, row).is_empty() {
                continue;
            }
            let number = |col| {
                table
                    .parse_u64(text, col, row)
                    .map_err(|source| CollectError::Format {
                        path: path.to_path_buf(),
                        source,
                    })
            };
            self.buckets.push((number(0)?, number(1)?));
        }
        Ok(())
    }
}

/// Frequency statistics of `cpu` between two reads of its residency table.
///
/// Returns `Ok(None)` until `previous` holds a read with elapsed ticks. The
/// bucket frequencies must match one to one across reads; a kernel that
/// reorders or replaces buckets yields [`CollectError::BucketDrift`].
pub fn scale_between(
    previous: &FreqTable,
    current: &FreqTable,
    cpu: usize,
) -> Result<Option<FreqScale>, CollectError> {
    if previous.is_empty() || previous.total_ticks() == 0 {
        return Ok(None);
    }
    let (prev, curr) = (previous.buckets(), current.buckets());
    let common = prev.len().min(curr.len());
    if let Some(index) = (0..common).find(|&i| prev[i].0 != curr[i].0) {
        return Err(CollectError::BucketDrift {
            cpu,
            index,
            previous_khz: prev[index].0,
            current_khz: curr[index].0,
        });
    }
    if prev.len() != curr.len() {
        return Err(CollectError::BucketDrift {
            cpu,
            index: common,
            previous_khz: prev.get(common).map_or(0, |b| b.0),
            current_khz: curr.get(common).map_or(0, |b| b.0),
        });
    }
    Ok(freq_scale(
        prev.iter()
            .zip(curr)
            .map(|(&(khz, before), &(_, after))| (khz, after.saturating_sub(before))),
    ))
}

/// One core's residency table sampler.
pub struct FreqSampler<F: FileSystem> {
    cpu: usize,
    path: PathBuf,
    engine: SamplingEngine<F>,
}

impl<F: FileSystem> FreqSampler<F> {
    pub fn new(fs: F, cpu: usize, path: PathBuf, dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self {
            cpu,
            path,
            engine: SamplingEngine::new(fs, TableLayout::whitespace(2), dispatcher),
        }
    }

    pub fn cpu(&self) -> usize {
        self.cpu
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn open(&mut self) -> Result<(), CollectError> {
        self.engine.open(&self.path)
    }

    pub fn refresh(
        &self,
        callback: impl FnOnce(Result<(), CollectError>) + Send + 'static,
    ) -> Result<(), CollectError> {
        self.engine.refresh(callback)
    }

    pub fn close(&mut self) -> Result<(), CollectError> {
        self.engine.close()
    }

    pub fn reader(&self) -> SnapshotReader {
        self.engine.reader()
    }

    pub fn engine(&self) -> &SamplingEngine<F> {
        &self.engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::dispatch::DispatchQueue;
    use crate::collector::mock::MockFs;
    use crate::collector::mock::scenarios::{MOCK_FREQS_KHZ, time_in_state_path};
    use std::sync::Mutex;
    use std::time::Duration;

    fn table(pairs: &[(u64, u64)]) -> FreqTable {
        FreqTable::new(pairs.to_vec())
    }

    #[test]
    fn test_no_scale_without_prior_ticks() {
        let curr = table(&[(800_000, 10), (1_600_000, 10)]);
        assert_eq!(scale_between(&FreqTable::default(), &curr, 0).unwrap(), None);
        let zero = table(&[(800_000, 0), (1_600_000, 0)]);
        assert_eq!(scale_between(&zero, &curr, 0).unwrap(), None);
    }

    #[test]
    fn test_scale_over_window() {
        let prev = table(&[(800_000, 100), (1_600_000, 100)]);
        let curr = table(&[(800_000, 100), (1_600_000, 200)]);
        let f = scale_between(&prev, &curr, 0).unwrap().unwrap();
        assert_eq!(f.avg_hz, 1_600_000_000);
        assert_eq!(f.max_hz, 1_600_000_000);
        assert!((f.scale - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_no_elapsed_ticks_gives_none() {
        let prev = table(&[(800_000, 100), (1_600_000, 100)]);
        assert_eq!(scale_between(&prev, &prev.clone(), 0).unwrap(), None);
    }

    #[test]
    fn test_changed_bucket_frequency_is_drift() {
        let prev = table(&[(800_000, 100), (1_600_000, 100)]);
        let curr = table(&[(800_000, 150), (2_000_000, 150)]);
        match scale_between(&prev, &curr, 3) {
            Err(CollectError::BucketDrift {
                cpu,
                index,
                previous_khz,
                current_khz,
            }) => {
                assert_eq!((cpu, index), (3, 1));
                assert_eq!((previous_khz, current_khz), (1_600_000, 2_000_000));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_added_bucket_is_drift() {
        let prev = table(&[(800_000, 100)]);
        let curr = table(&[(800_000, 150), (1_600_000, 10)]);
        match scale_between(&prev, &curr, 0) {
            Err(CollectError::BucketDrift {
                index,
                previous_khz,
                current_khz,
                ..
            }) => {
                assert_eq!(index, 1);
                assert_eq!(previous_khz, 0);
                assert_eq!(current_khz, 1_600_000);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_sampler_reads_mock_table() {
        let fs = MockFs::typical_system();
        let queue = DispatchQueue::new();
        let path = PathBuf::from(time_in_state_path("/sys", 2));
        let mut sampler = FreqSampler::new(fs.clone(), 2, path.clone(), Arc::new(queue.handle()));
        sampler.open().unwrap();

        let done = Arc::new(Mutex::new(None));
        let d = Arc::clone(&done);
        sampler
            .refresh(move |res| *d.lock().unwrap() = Some(res))
            .unwrap();
        assert!(queue.run_until(Duration::from_secs(5), || done.lock().unwrap().is_some()));
        done.lock().unwrap().take().unwrap().unwrap();

        let mut freq = FreqTable::default();
        freq.load(&sampler.reader().load(), &path).unwrap();
        let expected: Vec<(u64, u64)> = MOCK_FREQS_KHZ.iter().copied().zip([1000, 500, 250]).collect();
        assert_eq!(freq.buckets(), expected.as_slice());
        sampler.close().unwrap();
    }

    #[test]
    fn test_load_rejects_garbage() {
        let fs = MockFs::new();
        fs.add_file("/sys/t", "800000 abc\n");
        let queue = DispatchQueue::new();
        let mut sampler =
            FreqSampler::new(fs, 0, PathBuf::from("/sys/t"), Arc::new(queue.handle()));
        sampler.open().unwrap();
        let done = Arc::new(Mutex::new(false));
        let d = Arc::clone(&done);
        sampler
            .refresh(move |res| {
                res.unwrap();
                *d.lock().unwrap() = true;
            })
            .unwrap();
        assert!(queue.run_until(Duration::from_secs(5), || *done.lock().unwrap()));

        let mut freq = FreqTable::default();
        let err = freq
            .load(&sampler.reader().load(), Path::new("/sys/t"))
            .unwrap_err();
        assert!(matches!(err, CollectError::Format { .. }));
    }
}
