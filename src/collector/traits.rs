//! Abstractions for filesystem access to enable testing and mocking.
//!
//! The `FileSystem` trait allows the sampling engine to hold a real `/proc`
//! file handle on Linux or an in-memory handle from `MockFs` in tests.

use std::fs::File;
use std::io::{self, Read, Seek};
use std::path::Path;

/// Abstraction over opening pseudo-files.
///
/// Handles are kept open for the lifetime of a sampling engine and rewound
/// before every read, so the handle type must be seekable and movable to the
/// engine's worker thread.
pub trait FileSystem: Send + Sync {
    /// Handle returned by [`FileSystem::open`].
    type File: Read + Seek + Send + 'static;

    /// Opens a file for repeated whole-file reads.
    fn open(&self, path: &Path) -> io::Result<Self::File>;

    /// Checks if a path exists.
    fn exists(&self, path: &Path) -> bool;
}

/// Real filesystem implementation that delegates to `std::fs`.
///
/// Use this in production to read from the actual `/proc` and `/sys` trees.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFs;

impl RealFs {
    /// Creates a new `RealFs` instance.
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for RealFs {
    type File = File;

    fn open(&self, path: &Path) -> io::Result<File> {
        File::open(path)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{SeekFrom, Write};

    #[test]
    fn test_real_fs_open_and_reread() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"cpu  1 2 3\n").unwrap();

        let fs = RealFs::new();
        let mut file = fs.open(tmp.path()).unwrap();
        let mut content = String::new();
        file.read_to_string(&mut content).unwrap();
        assert_eq!(content, "cpu  1 2 3\n");

        file.seek(SeekFrom::Start(0)).unwrap();
        content.clear();
        file.read_to_string(&mut content).unwrap();
        assert_eq!(content, "cpu  1 2 3\n");
    }

    #[test]
    fn test_real_fs_exists() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let fs = RealFs::new();
        assert!(fs.exists(tmp.path()));
        assert!(!fs.exists(Path::new("/nonexistent/path/12345")));
    }

    #[test]
    fn test_real_fs_open_missing() {
        let fs = RealFs::new();
        let err = fs.open(Path::new("/nonexistent/path/12345")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
