//! In-memory mock filesystem for testing samplers without real `/proc`.
//!
//! This module provides `MockFs` which simulates pseudo-files in memory.
//! Clones share the same file table, so a test can keep one handle, hand
//! another to a sampling engine and change file content between refreshes.
//! Like a kernel pseudo-file, an opened handle picks up the current content
//! every time it is rewound to the start.

use crate::collector::traits::FileSystem;
use std::collections::HashMap;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

/// In-memory filesystem for testing.
#[derive(Debug, Clone, Default)]
pub struct MockFs {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<State>,
    resumed: Condvar,
}

#[derive(Debug, Default)]
struct State {
    files: HashMap<PathBuf, Entry>,
    paused: bool,
    /// Read cycles currently parked by `pause`.
    blocked: usize,
}

#[derive(Debug, Default)]
struct Entry {
    content: Vec<u8>,
    fail_reads: bool,
    /// Upper bound on bytes returned by a single `read` call.
    chunk_limit: Option<usize>,
    /// Number of rewinds, i.e. whole-file read cycles.
    reads: usize,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MockFs {
    /// Creates a new empty mock filesystem.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a file with the given text content.
    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<String>) {
        self.add_bytes(path, content.into().into_bytes());
    }

    /// Adds or replaces a file with raw bytes (may be invalid UTF-8).
    ///
    /// Failure injection and chunk limits set on an existing file are kept.
    pub fn add_bytes(&self, path: impl AsRef<Path>, content: Vec<u8>) {
        let mut state = self.inner.lock();
        state
            .files
            .entry(path.as_ref().to_path_buf())
            .or_default()
            .content = content;
    }

    /// Removes a file. Handles opened earlier fail on their next rewind.
    pub fn remove_file(&self, path: impl AsRef<Path>) {
        self.inner.lock().files.remove(path.as_ref());
    }

    /// Makes every read of `path` fail with an I/O error.
    pub fn fail_reads(&self, path: impl AsRef<Path>, fail: bool) {
        if let Some(entry) = self.inner.lock().files.get_mut(path.as_ref()) {
            entry.fail_reads = fail;
        }
    }

    /// Limits how many bytes a single `read` call on `path` returns.
    pub fn set_chunk_limit(&self, path: impl AsRef<Path>, limit: Option<usize>) {
        if let Some(entry) = self.inner.lock().files.get_mut(path.as_ref()) {
            entry.chunk_limit = limit;
        }
    }

    /// Number of whole-file read cycles performed on `path` so far.
    pub fn read_count(&self, path: impl AsRef<Path>) -> usize {
        self.inner
            .lock()
            .files
            .get(path.as_ref())
            .map(|e| e.reads)
            .unwrap_or(0)
    }

    /// Number of read cycles currently blocked by [`MockFs::pause`].
    pub fn blocked_reads(&self) -> usize {
        self.inner.lock().blocked
    }

    /// Blocks every subsequent read cycle until [`MockFs::resume`] is called.
    pub fn pause(&self) {
        self.inner.lock().paused = true;
    }

    /// Releases read cycles blocked by [`MockFs::pause`].
    pub fn resume(&self) {
        self.inner.lock().paused = false;
        self.inner.resumed.notify_all();
    }
}

impl FileSystem for MockFs {
    type File = MockFile;

    fn open(&self, path: &Path) -> io::Result<MockFile> {
        if !self.exists(path) {
            return Err(not_found(path));
        }
        Ok(MockFile {
            inner: Arc::clone(&self.inner),
            path: path.to_path_buf(),
            data: Vec::new(),
            pos: 0,
            fail: false,
            chunk_limit: None,
        })
    }

    fn exists(&self, path: &Path) -> bool {
        self.inner.lock().files.contains_key(path)
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("file not found: {:?}", path),
    )
}

/// Open handle into a [`MockFs`] file.
#[derive(Debug)]
pub struct MockFile {
    inner: Arc<Inner>,
    path: PathBuf,
    data: Vec<u8>,
    pos: usize,
    fail: bool,
    chunk_limit: Option<usize>,
}

impl MockFile {
    /// Re-captures the file content, as the kernel regenerates a pseudo-file
    /// when it is read from offset zero.
    fn regenerate(&mut self) -> io::Result<()> {
        let mut state = self.inner.lock();
        if state.paused {
            state.blocked += 1;
            while state.paused {
                state = self
                    .inner
                    .resumed
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            state.blocked -= 1;
        }
        let entry = state
            .files
            .get_mut(&self.path)
            .ok_or_else(|| not_found(&self.path))?;
        entry.reads += 1;
        self.data.clear();
        self.data.extend_from_slice(&entry.content);
        self.fail = entry.fail_reads;
        self.chunk_limit = entry.chunk_limit;
        Ok(())
    }
}

impl Read for MockFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.fail {
            return Err(io::Error::other(format!(
                "injected read failure: {:?}",
                self.path
            )));
        }
        let remaining = self.data.len().saturating_sub(self.pos);
        let mut n = remaining.min(buf.len());
        if let Some(limit) = self.chunk_limit {
            n = n.min(limit);
        }
        if n == 0 {
            return Ok(0);
        }
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl Seek for MockFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(0) => {
                self.regenerate()?;
                0
            }
            SeekFrom::Start(n) => n as i64,
            SeekFrom::Current(delta) => self.pos as i64 + delta,
            SeekFrom::End(delta) => self.data.len() as i64 + delta,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of file",
            ));
        }
        self.pos = target as usize;
        Ok(self.pos as u64)
    }
}
