//! Test support shared by unit and integration tests.
//!
//! This module provides:
//! - Scripted step adapters that record their inputs
//! - Catalog builders over scripted adapters
//! - An in-memory engine harness that drains its queue by hand
//! - Fake executables for adapter tests

mod fixtures;
mod mocks;

#[cfg(unix)]
pub use fixtures::fake_tool;
pub use fixtures::{scripted_catalog, scripted_catalog_with, TestEngine};
pub use mocks::ScriptedAdapter;
