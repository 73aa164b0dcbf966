//! Double-buffered asynchronous sampling of one pseudo-file.
//!
//! # Architecture
//!
//! ```text
//!  caller thread                         worker thread
//!  ─────────────                         ─────────────
//!  refresh(cb) ──► completion slot
//!              └─► Mailbox [Read] ─────► take() ─► read + decode + parse
//!                                                   into spare Generation
//!  snapshot() ◄── ArcSwap<Generation> ◄─────────── swap (publish)
//!                                                   │
//!  DispatchQueue ◄──────────────────── dispatch(cb) ┘
//! ```
//!
//! The mailbox holds a single command. Posting overwrites it, so a burst of
//! refreshes collapses into one read, and the completion slot keeps only the
//! most recent callback. Published generations are immutable; the worker
//! rewrites the retired one in place for the next cycle unless a reader still
//! holds it.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use arc_swap::ArcSwap;
use tracing::{debug, error, trace, warn};

use crate::collector::dispatch::Dispatcher;
use crate::collector::error::CollectError;
use crate::collector::procfs::{
    ParseError, PseudoFileSource, SpanTable, Tokenizer, count_rows, parse,
};
use crate::collector::traits::FileSystem;

/// Callback invoked once a refresh cycle finished (or failed).
pub type Completion = Box<dyn FnOnce(Result<(), CollectError>) + Send + 'static>;

/// Shape of the table an engine produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableLayout {
    pub tokenizer: Tokenizer,
    /// Column capacity; extra cells on a line are dropped.
    pub columns: usize,
    /// Maximum number of rows parsed from the top of the file.
    pub row_limit: Option<usize>,
}

impl TableLayout {
    pub fn whitespace(columns: usize) -> Self {
        Self {
            tokenizer: Tokenizer::Whitespace,
            columns,
            row_limit: None,
        }
    }

    /// Three columns: key with colon, value, remainder.
    pub fn key_value() -> Self {
        Self {
            tokenizer: Tokenizer::KeyValue,
            columns: 3,
            row_limit: None,
        }
    }

    pub fn with_row_limit(mut self, rows: usize) -> Self {
        self.row_limit = Some(rows);
        self
    }
}

/// One completed read: the decoded text and the spans of every cell.
#[derive(Debug, Clone, Default)]
pub struct Generation {
    text: String,
    table: SpanTable,
    sequence: u64,
    captured_at: Option<Instant>,
}

impl Generation {
    fn empty(columns: usize) -> Self {
        Self {
            table: SpanTable::with_columns(columns),
            ..Self::default()
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn table(&self) -> &SpanTable {
        &self.table
    }

    /// Number of reads published before and including this one; 0 means no
    /// read has completed yet.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// When the file content was read.
    pub fn captured_at(&self) -> Option<Instant> {
        self.captured_at
    }

    pub fn column_count(&self) -> usize {
        self.table.column_count()
    }

    pub fn row_count(&self) -> usize {
        self.table.row_count()
    }

    /// Cell text borrowed from this generation.
    pub fn cell_text(&self, col: usize, row: usize) -> &str {
        self.table.cell(&self.text, col, row)
    }

    /// Parses text obtained elsewhere, e.g. a saved copy of a pseudo-file.
    pub fn from_text(text: impl Into<String>, layout: TableLayout) -> Result<Self, ParseError> {
        let mut generation = Self::empty(layout.columns);
        generation.text = text.into();
        generation.reparse(layout)?;
        Ok(generation)
    }

    /// Rebuilds the span table from the current text. Returns the row count.
    fn reparse(&mut self, layout: TableLayout) -> Result<usize, ParseError> {
        let (rows, trailing) = count_rows(&self.text);
        let rows = layout.row_limit.map_or(rows, |limit| rows.min(limit));
        parse(&mut self.table, &self.text, rows, trailing, layout.tokenizer)?;
        Ok(rows)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Read,
    Quit,
}

/// Single-slot command holder.
#[derive(Debug, Default)]
struct Mailbox {
    slot: Mutex<Option<Command>>,
    ready: Condvar,
}

impl Mailbox {
    fn lock(&self) -> MutexGuard<'_, Option<Command>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Posts a command, replacing one not yet taken. A pending `Quit` is
    /// never replaced. Returns true if an unconsumed command was coalesced.
    fn post(&self, command: Command) -> bool {
        let mut slot = self.lock();
        if *slot == Some(Command::Quit) {
            return false;
        }
        let coalesced = slot.replace(command).is_some();
        self.ready.notify_one();
        coalesced
    }

    /// Blocks until a command is available and takes it.
    fn take(&self) -> Command {
        let mut slot = self.lock();
        loop {
            if let Some(command) = slot.take() {
                return command;
            }
            slot = self
                .ready
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    #[cfg(test)]
    fn try_take(&self) -> Option<Command> {
        self.lock().take()
    }
}

/// State shared between an engine and its current worker.
#[derive(Default)]
struct Shared {
    mailbox: Mailbox,
    completion: Mutex<Option<Completion>>,
    /// Set under the `completion` lock when the worker died on an error.
    stopped: AtomicBool,
}

impl Shared {
    fn completion(&self) -> MutexGuard<'_, Option<Completion>> {
        self.completion
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Lock-free read access to an engine's latest generation.
#[derive(Clone)]
pub struct SnapshotReader {
    published: Arc<ArcSwap<Generation>>,
}

impl SnapshotReader {
    pub fn load(&self) -> Arc<Generation> {
        self.published.load_full()
    }
}

/// Samples one pseudo-file on a dedicated worker thread.
///
/// States: closed (after `new` or `close`), open and idle, reading.
pub struct SamplingEngine<F: FileSystem> {
    fs: F,
    layout: TableLayout,
    dispatcher: Arc<dyn Dispatcher>,
    published: Arc<ArcSwap<Generation>>,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
    path: Option<PathBuf>,
}

impl<F: FileSystem> SamplingEngine<F> {
    /// Creates a closed engine. Callbacks of later refreshes are delivered
    /// through `dispatcher`.
    pub fn new(fs: F, layout: TableLayout, dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self {
            fs,
            layout,
            dispatcher,
            published: Arc::new(ArcSwap::from_pointee(Generation::empty(layout.columns))),
            shared: Arc::new(Shared::default()),
            worker: None,
            path: None,
        }
    }

    /// Opens `path` and starts the worker.
    pub fn open(&mut self, path: impl AsRef<Path>) -> Result<(), CollectError> {
        if let Some(open) = &self.path {
            return Err(CollectError::AlreadyOpen { path: open.clone() });
        }
        let path = path.as_ref().to_path_buf();
        let file = self.fs.open(&path).map_err(|source| CollectError::Open {
            path: path.clone(),
            source,
        })?;

        let shared = Arc::new(Shared::default());
        let worker = Worker {
            source: PseudoFileSource::new(path.clone(), file),
            layout: self.layout,
            shared: Arc::clone(&shared),
            published: Arc::clone(&self.published),
            dispatcher: Arc::clone(&self.dispatcher),
            spare: None,
            sequence: self.published.load().sequence,
        };
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let handle = thread::Builder::new()
            .name(format!("proctab-{}", name))
            .spawn(move || worker.run())
            .map_err(CollectError::Spawn)?;

        debug!(path = %path.display(), "sampler opened");
        self.shared = shared;
        self.worker = Some(handle);
        self.path = Some(path);
        Ok(())
    }

    /// Requests a read. Returns immediately; `callback` runs on the engine's
    /// dispatcher once the read is published.
    ///
    /// A callback not yet delivered is replaced, and a read not yet started
    /// is merged with this one, so overlapping refreshes produce a single
    /// callback (the last one registered).
    pub fn refresh(
        &self,
        callback: impl FnOnce(Result<(), CollectError>) + Send + 'static,
    ) -> Result<(), CollectError> {
        let Some(path) = &self.path else {
            return Err(CollectError::NotOpen);
        };
        {
            let mut slot = self.shared.completion();
            if self.shared.stopped.load(Ordering::Acquire) {
                return Err(CollectError::Stopped { path: path.clone() });
            }
            if slot.replace(Box::new(callback)).is_some() {
                trace!(path = %path.display(), "replaced undelivered callback");
            }
        }
        if self.shared.mailbox.post(Command::Read) {
            trace!(path = %path.display(), "coalesced pending read");
        }
        Ok(())
    }

    /// Stops the worker and releases the file. Blocks until the worker has
    /// exited; a read in progress completes first. An undelivered callback is
    /// dropped.
    pub fn close(&mut self) -> Result<(), CollectError> {
        let path = self.path.take().unwrap_or_default();
        let Some(handle) = self.worker.take() else {
            return Ok(());
        };
        {
            let mut slot = self.shared.mailbox.lock();
            *slot = Some(Command::Quit);
            self.shared.mailbox.ready.notify_one();
        }
        let joined = handle.join();
        self.shared.completion().take();
        debug!(path = %path.display(), "sampler closed");
        joined.map_err(|_| CollectError::WorkerPanicked { path })
    }

    pub fn is_open(&self) -> bool {
        self.worker.is_some()
    }

    /// True once the worker stopped on a read or format error.
    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::Acquire)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn layout(&self) -> TableLayout {
        self.layout
    }

    /// The most recently published generation. Never blocks.
    pub fn snapshot(&self) -> Arc<Generation> {
        self.published.load_full()
    }

    pub fn reader(&self) -> SnapshotReader {
        SnapshotReader {
            published: Arc::clone(&self.published),
        }
    }

    pub fn column_count(&self) -> usize {
        self.published.load().column_count()
    }

    pub fn row_count(&self) -> usize {
        self.published.load().row_count()
    }

    pub fn sequence(&self) -> u64 {
        self.published.load().sequence
    }
}

impl<F: FileSystem> Drop for SamplingEngine<F> {
    fn drop(&mut self) {
        if self.worker.is_some()
            && let Err(e) = self.close()
        {
            warn!("failed to close sampler: {}", e);
        }
    }
}

struct Worker<R> {
    source: PseudoFileSource<R>,
    layout: TableLayout,
    shared: Arc<Shared>,
    published: Arc<ArcSwap<Generation>>,
    dispatcher: Arc<dyn Dispatcher>,
    /// Retired generation, rewritten by the next cycle.
    spare: Option<Arc<Generation>>,
    sequence: u64,
}

impl<R: std::io::Read + std::io::Seek> Worker<R> {
    fn run(mut self) {
        loop {
            match self.shared.mailbox.take() {
                Command::Quit => break,
                Command::Read => {}
            }
            match self.cycle() {
                Ok(()) => self.deliver(Ok(())),
                Err(e) => {
                    error!(path = %self.source.path().display(), "sampler stopped: {}", e);
                    let callback = {
                        let mut slot = self.shared.completion();
                        self.shared.stopped.store(true, Ordering::Release);
                        slot.take()
                    };
                    if let Some(callback) = callback {
                        self.dispatcher.dispatch(Box::new(move || callback(Err(e))));
                    }
                    break;
                }
            }
        }
        trace!(path = %self.source.path().display(), "sampler worker exiting");
    }

    /// Reads, decodes and parses into the spare generation, then publishes it.
    fn cycle(&mut self) -> Result<(), CollectError> {
        let mut next = self
            .spare
            .take()
            .unwrap_or_else(|| Arc::new(Generation::empty(self.layout.columns)));
        if Arc::strong_count(&next) > 1 {
            trace!(path = %self.source.path().display(), "retired generation still in use, copying");
        }
        let generation = Arc::make_mut(&mut next);

        let bytes = self.source.read_text(&mut generation.text)?;
        generation.captured_at = Some(Instant::now());

        let rows = generation
            .reparse(self.layout)
            .map_err(|source| CollectError::Format {
                path: self.source.path().to_path_buf(),
                source,
            })?;

        self.sequence += 1;
        generation.sequence = self.sequence;
        debug!(
            path = %self.source.path().display(),
            bytes,
            rows,
            sequence = self.sequence,
            "sample published"
        );
        self.spare = Some(self.published.swap(next));
        Ok(())
    }

    fn deliver(&self, result: Result<(), CollectError>) {
        let callback = self.shared.completion().take();
        if let Some(callback) = callback {
            self.dispatcher.dispatch(Box::new(move || callback(result)));
        }
    }
}
