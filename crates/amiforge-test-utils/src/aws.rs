//! AWS test utilities
//!
//! Provides region detection and unique build name generation for AWS integration tests.

use chrono::Utc;

/// Get the AWS region for tests.
///
/// Checks environment variables in order:
/// 1. AWS_REGION
/// 2. AWS_DEFAULT_REGION
/// 3. Falls back to us-east-1
///
/// # Example
///
/// ```
/// use amiforge_test_utils::aws::get_test_region;
///
/// let region = get_test_region();
/// assert!(!region.is_empty());
/// ```
pub fn get_test_region() -> String {
    std::env::var("AWS_REGION")
        .or_else(|_| std::env::var("AWS_DEFAULT_REGION"))
        .unwrap_or_else(|_| "us-east-1".to_string())
}

/// Generate a unique build name for test resources.
///
/// Format: `amiforge-test-{timestamp_ms}-{counter}`. Valid as a build spec name
/// and unique even when tests start simultaneously.
///
/// # Example
///
/// ```
/// use amiforge_test_utils::aws::test_build_name;
///
/// let name = test_build_name();
/// assert!(name.starts_with("amiforge-test-"));
/// ```
pub fn test_build_name() -> String {
    use std::sync::atomic::{AtomicU32, Ordering};
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    let ts = Utc::now().timestamp_millis();
    let counter = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("amiforge-test-{ts}-{counter}")
}
