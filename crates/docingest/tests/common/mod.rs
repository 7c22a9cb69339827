//! Shared test utilities for docingest integration tests.
//!
//! This module provides:
//! - `TestHarness` for isolated execution with temp directories and a manual clock
//! - Test doubles for vector stores and extractors that misbehave on purpose

pub mod fakes;
pub mod harness;

pub use fakes::*;
pub use harness::TestHarness;
