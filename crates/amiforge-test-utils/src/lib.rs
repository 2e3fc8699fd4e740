//! Shared test utilities for amiforge
//!
//! This crate provides common test helpers that can be used across
//! multiple test modules without circular dependencies.
//!
//! ## Modules
//!
//! - [`aws`]: AWS region detection and unique build names
//! - [`spec`]: Build spec fixtures

pub mod aws;
pub mod spec;

// Re-export commonly used items
pub use aws::{get_test_region, test_build_name};
pub use spec::{sample_spec, sample_spec_json};
