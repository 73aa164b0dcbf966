//! Error type shared by sources, engines and data sources.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::collector::procfs::ParseError;

/// Errors that can occur while sampling pseudo-files.
///
/// Everything except `NotOpen`/`AlreadyOpen` is fatal for the engine that
/// produced it: its worker stops and later refreshes report `Stopped`.
#[derive(Error, Debug)]
pub enum CollectError {
    #[error("failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unexpected format in {}: {source}", path.display())]
    Format {
        path: PathBuf,
        #[source]
        source: ParseError,
    },

    #[error("{} is already open", path.display())]
    AlreadyOpen { path: PathBuf },

    #[error("sampler is not open")]
    NotOpen,

    #[error("sampler for {} stopped after a fatal error", path.display())]
    Stopped { path: PathBuf },

    #[error("sampler worker for {} panicked", path.display())]
    WorkerPanicked { path: PathBuf },

    #[error(
        "cpu{cpu}: frequency bucket {index} changed from {previous_khz} kHz to {current_khz} kHz"
    )]
    BucketDrift {
        cpu: usize,
        index: usize,
        previous_khz: u64,
        current_khz: u64,
    },

    #[error("failed to spawn sampler worker: {0}")]
    Spawn(#[source] io::Error),
}
