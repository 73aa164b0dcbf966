//! Mock filesystem implementations for testing.
//!
//! This module provides `MockFs` and pre-built scenarios for testing
//! samplers without requiring actual Linux `/proc` filesystem access.

mod filesystem;
pub mod scenarios;

pub use filesystem::{MockFile, MockFs};
