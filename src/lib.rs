//! proctab - asynchronous sampling of Linux pseudo-files.
//!
//! Provides:
//! - `collector`: pseudo-file sources, the tabular parser, the double-buffered
//!   sampling engine and the CPU / meminfo data sources built on top of it
//! - `rates`: counter delta, load and frequency-scale math
//! - `table`: the read-only text table interface consumed by renderers
//! - `config`: sampling paths and cadence

pub mod collector;
pub mod config;
pub mod rates;
pub mod table;
