//! Shared test utilities for docflow integration tests.
//!
//! This module provides:
//! - `TestHarness` for isolated runs against a temp database and blob root
//! - Extractor, blob store and queue doubles for failure scenarios

pub mod doubles;
pub mod harness;

pub use doubles::*;
pub use harness::TestHarness;
