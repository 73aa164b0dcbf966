//! Whole-file reader for pseudo-files.
//!
//! Pseudo-files report a length of zero and are regenerated by the kernel on
//! every read from offset zero, so the source keeps one open handle, rewinds
//! it before each read and reads until EOF into a buffer that only grows.

use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::trace;

use crate::collector::error::CollectError;

/// Initial buffer size. Most pseudo-files of interest are shorter.
pub const INITIAL_CAPACITY: usize = 4096;

/// Replacement for byte sequences that are not valid UTF-8.
pub const REPLACEMENT: char = '\u{FFFD}';

/// One open pseudo-file and its reusable byte buffer.
#[derive(Debug)]
pub struct PseudoFileSource<R> {
    path: PathBuf,
    file: R,
    bytes: Vec<u8>,
}

impl<R: Read + Seek> PseudoFileSource<R> {
    /// Wraps an already opened handle.
    pub fn new(path: impl Into<PathBuf>, file: R) -> Self {
        Self {
            path: path.into(),
            file,
            bytes: vec![0; INITIAL_CAPACITY],
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current buffer capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    /// Reads the whole current content of the file.
    ///
    /// The buffer grows by half whenever a read fills it completely, because
    /// the file length cannot be queried up front.
    pub fn read(&mut self) -> Result<&[u8], CollectError> {
        let len = self.read_all().map_err(|source| CollectError::Read {
            path: self.path.clone(),
            source,
        })?;
        Ok(&self.bytes[..len])
    }

    /// Reads the file and decodes it into `out`, replacing its content.
    ///
    /// Invalid UTF-8 is replaced with [`REPLACEMENT`]; decoding never fails.
    pub fn read_text(&mut self, out: &mut String) -> Result<usize, CollectError> {
        let bytes = self.read()?;
        let n = bytes.len();
        decode_lossy(bytes, out);
        Ok(n)
    }

    fn read_all(&mut self) -> io::Result<usize> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut len = 0;
        loop {
            match self.file.read(&mut self.bytes[len..]) {
                Ok(0) => break,
                Ok(k) => len += k,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
            if len == self.bytes.len() {
                let grown = self.bytes.len() * 3 / 2;
                trace!(path = %self.path.display(), from = len, to = grown, "growing read buffer");
                self.bytes.resize(grown, 0);
            }
        }
        Ok(len)
    }
}

/// Decodes UTF-8 into `out` (cleared first), substituting invalid sequences.
///
/// Reuses `out`'s allocation, unlike `String::from_utf8_lossy`.
pub fn decode_lossy(bytes: &[u8], out: &mut String) {
    out.clear();
    out.reserve(bytes.len());
    for chunk in bytes.utf8_chunks() {
        out.push_str(chunk.valid());
        if !chunk.invalid().is_empty() {
            out.push(REPLACEMENT);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mock::MockFs;
    use crate::collector::traits::FileSystem;

    fn source(fs: &MockFs, path: &str) -> PseudoFileSource<crate::collector::mock::MockFile> {
        let file = fs.open(Path::new(path)).unwrap();
        PseudoFileSource::new(path, file)
    }

    #[test]
    fn test_read_rereads_from_start() {
        let fs = MockFs::new();
        fs.add_file("/proc/loadavg", "0.15 0.10 0.05 1/150 1234\n");
        let mut src = source(&fs, "/proc/loadavg");

        assert_eq!(src.read().unwrap(), b"0.15 0.10 0.05 1/150 1234\n");
        fs.add_file("/proc/loadavg", "1.00 0.50 0.25 2/151 1240\n");
        assert_eq!(src.read().unwrap(), b"1.00 0.50 0.25 2/151 1240\n");
    }

    #[test]
    fn test_buffer_grows_geometrically() {
        let fs = MockFs::new();
        let big = "x".repeat(INITIAL_CAPACITY * 2 + 17);
        fs.add_file("/proc/big", big.clone());
        fs.set_chunk_limit("/proc/big", Some(1000));
        let mut src = source(&fs, "/proc/big");

        let mut text = String::new();
        assert_eq!(src.read_text(&mut text).unwrap(), big.len());
        assert_eq!(text, big);
        // 4096 -> 6144 -> 9216
        assert_eq!(src.capacity(), 9216);
    }

    #[test]
    fn test_exact_fit_grows_once() {
        let fs = MockFs::new();
        fs.add_file("/proc/exact", "y".repeat(INITIAL_CAPACITY));
        let mut src = source(&fs, "/proc/exact");
        assert_eq!(src.read().unwrap().len(), INITIAL_CAPACITY);
        assert_eq!(src.capacity(), INITIAL_CAPACITY * 3 / 2);
    }

    #[test]
    fn test_decode_lossy_replaces_invalid() {
        let mut out = String::from("stale");
        decode_lossy(b"cpu\xff 12\n", &mut out);
        assert_eq!(out, "cpu\u{FFFD} 12\n");
    }

    #[test]
    fn test_truncated_multibyte_sequence() {
        let fs = MockFs::new();
        fs.add_bytes("/proc/odd", b"name \xe2\x82".to_vec());
        let mut src = source(&fs, "/proc/odd");
        let mut text = String::new();
        src.read_text(&mut text).unwrap();
        assert_eq!(text, "name \u{FFFD}");
    }

    #[test]
    fn test_read_failure_is_reported() {
        let fs = MockFs::new();
        fs.add_file("/proc/stat", "cpu  1\n");
        fs.fail_reads("/proc/stat", true);
        let mut src = source(&fs, "/proc/stat");
        match src.read() {
            Err(CollectError::Read { path, .. }) => assert_eq!(path, Path::new("/proc/stat")),
            other => panic!("unexpected result: {:?}", other.map(|b| b.len())),
        }
    }
}
