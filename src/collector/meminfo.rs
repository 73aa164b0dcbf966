//! `/proc/meminfo` sampling with the key/value tokenizer.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::collector::dispatch::Dispatcher;
use crate::collector::engine::{Generation, SamplingEngine, TableLayout};
use crate::collector::error::CollectError;
use crate::collector::traits::FileSystem;

/// Samples `/proc/meminfo`. Columns: key with colon, value, unit.
pub struct MemInfo<F: FileSystem> {
    path: PathBuf,
    engine: SamplingEngine<F>,
}

impl<F: FileSystem> MemInfo<F> {
    pub fn new(fs: F, path: impl Into<PathBuf>, dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self {
            path: path.into(),
            engine: SamplingEngine::new(fs, TableLayout::key_value(), dispatcher),
        }
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

    pub fn snapshot(&self) -> Arc<Generation> {
        self.engine.snapshot()
    }

    /// Value of `key` (without colon) from the latest read.
    pub fn value_kb(&self, key: &str) -> Result<Option<u64>, CollectError> {
        value_kb(&self.snapshot(), key, &self.path)
    }
}

/// Looks up the numeric value of `key` in a parsed meminfo generation.
///
/// Values are reported as printed: kB for sized entries, plain counts for the
/// few unitless ones such as `HugePages_Total`.
pub fn value_kb(
    generation: &Generation,
    key: &str,
    path: &Path,
) -> Result<Option<u64>, CollectError> {
    let table = generation.table();
    let text = generation.text();
    let Some(row) = (0..table.row_count())
        .find(|&row| table.cell(text, 0, row).strip_suffix(':') == Some(key))
    else {
        return Ok(None);
    };
    table
        .parse_u64(text, 1, row)
        .map(Some)
        .map_err(|source| CollectError::Format {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::dispatch::DispatchQueue;
    use crate::collector::mock::MockFs;
    use std::sync::Mutex;
    use std::time::Duration;

    fn refreshed(fs: &MockFs, queue: &DispatchQueue) -> MemInfo<MockFs> {
        let mut mem = MemInfo::new(fs.clone(), "/proc/meminfo", Arc::new(queue.handle()));
        mem.open().unwrap();
        let done = Arc::new(Mutex::new(false));
        let d = Arc::clone(&done);
        mem.refresh(move |res| {
            res.unwrap();
            *d.lock().unwrap() = true;
        })
        .unwrap();
        assert!(queue.run_until(Duration::from_secs(5), || *done.lock().unwrap()));
        mem
    }

    #[test]
    fn test_value_lookup() {
        let fs = MockFs::typical_system();
        let queue = DispatchQueue::new();
        let mem = refreshed(&fs, &queue);

        assert_eq!(mem.value_kb("MemTotal").unwrap(), Some(16_384_000));
        assert_eq!(mem.value_kb("SwapCached").unwrap(), Some(0));
        assert_eq!(mem.value_kb("HugePages_Total").unwrap(), Some(0));
        assert_eq!(mem.value_kb("Nonexistent").unwrap(), None);

        let snap = mem.snapshot();
        assert_eq!(snap.column_count(), 3);
        assert_eq!(snap.row_count(), 10);
        // Unitless rows have an empty unit cell.
        assert_eq!(snap.cell_text(2, 8), "");
        assert_eq!(snap.cell_text(2, 9), "kB");
    }

    #[test]
    fn test_malformed_value() {
        let fs = MockFs::new();
        fs.add_file("/proc/meminfo", "MemTotal:  lots kB\n");
        let queue = DispatchQueue::new();
        let mem = refreshed(&fs, &queue);
        assert!(matches!(
            mem.value_kb("MemTotal"),
            Err(CollectError::Format { .. })
        ));
    }
}
