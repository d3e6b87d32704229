//! Shared test utilities for slicequeue integration tests.
//!
//! This module provides:
//! - `TestHarness` with a temp media directory and an in-memory database
//! - `ScriptedSlicer`, a stand-in engine whose outcomes are set per file

pub mod harness;
pub mod slicer;

pub use harness::TestHarness;
pub use slicer::{ScriptedSlicer, Step};
