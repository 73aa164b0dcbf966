//! Asynchronous pseudo-file samplers for Linux.
//!
//! This module reads `/proc` and `/sys` pseudo-files on background workers,
//! parses them into span tables without copying cell text and publishes each
//! result as an immutable snapshot, with support for mocking for testing.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          CpuSampler                          │
//! │   refresh(cb) ──► CompletionBarrier (1 + frequency engines)  │
//! │  ┌────────────────────┐   ┌──────────────────────────────┐   │
//! │  │  SamplingEngine    │   │  FreqSampler × cores         │   │
//! │  │  - /proc/stat      │   │  - cpuN/.../time_in_state    │   │
//! │  └─────────┬──────────┘   └──────────────┬───────────────┘   │
//! │            └──────────────┬──────────────┘                   │
//! │                           │                                  │
//! │          ┌────────────────▼─────────────────┐                │
//! │          │ PseudoFileSource → parse → swap  │ (per worker)   │
//! │          └────────────────┬─────────────────┘                │
//! │                    ┌──────▼──────┐                           │
//! │                    │  FileSystem │ (trait)                   │
//! │                    └──────┬──────┘                           │
//! └───────────────────────────┼──────────────────────────────────┘
//!                             │
//!             ┌───────────────┼───────────────┐
//!             │               │               │
//!      ┌──────▼──────┐ ┌──────▼──────┐ ┌──────▼──────┐
//!      │   RealFs    │ │   MockFs    │ │  Scenarios  │
//!      │ (Linux)     │ │ (Testing)   │ │ (Fixtures)  │
//!      └─────────────┘ └─────────────┘ └─────────────┘
//! ```
//!
//! Completion callbacks are handed to a [`Dispatcher`]; with a
//! [`DispatchQueue`] they run on the thread that pumps the queue.
//!
//! # Usage
//!
//! ## Production (Linux)
//!
//! ```ignore
//! use std::sync::Arc;
//! use proctab::collector::{CpuSampler, DispatchQueue, RealFs};
//! use proctab::config::SamplerConfig;
//!
//! let queue = DispatchQueue::new();
//! let mut cpu = CpuSampler::new(RealFs::new(), SamplerConfig::default(), Arc::new(queue.handle()));
//! cpu.open()?;
//! cpu.refresh(|result| result.unwrap())?;
//! queue.run_for(std::time::Duration::from_secs(1));
//! ```
//!
//! ## Testing (with MockFs)
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicBool, Ordering};
//! use std::time::Duration;
//! use proctab::collector::{CpuSampler, DispatchQueue, MockFs};
//! use proctab::config::SamplerConfig;
//!
//! let fs = MockFs::typical_system();
//! let queue = DispatchQueue::new();
//! let mut cpu = CpuSampler::new(fs, SamplerConfig::new().with_cores(4), Arc::new(queue.handle()));
//! cpu.open().unwrap();
//!
//! let done = Arc::new(AtomicBool::new(false));
//! let d = Arc::clone(&done);
//! cpu.refresh(move |result| {
//!     result.unwrap();
//!     d.store(true, Ordering::SeqCst);
//! })
//! .unwrap();
//! assert!(queue.run_until(Duration::from_secs(5), || done.load(Ordering::SeqCst)));
//! assert_eq!(cpu.report().cores.len(), 5);
//! ```

pub mod barrier;
pub mod cpu;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod freq;
pub mod meminfo;
pub mod mock;
pub mod procfs;
pub mod traits;

pub use barrier::CompletionBarrier;
pub use cpu::{CpuReport, CpuSampler};
pub use dispatch::{DispatchHandle, DispatchQueue, Dispatcher, InlineDispatcher};
pub use engine::{Generation, SamplingEngine, SnapshotReader, TableLayout};
pub use error::CollectError;
pub use freq::{FreqSampler, FreqTable};
pub use meminfo::MemInfo;
pub use mock::MockFs;
pub use traits::{FileSystem, RealFs};
