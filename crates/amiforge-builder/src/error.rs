//! Build error taxonomy
//!
//! `anyhow` carries errors across the provider boundary; these variants are
//! the conditions callers match on, recovered with `downcast_ref`.

use amiforge_common::ResourceKind;
use std::time::Duration;
use thiserror::Error;

/// One failed item of a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
    /// Position of the item in the submitted batch
    pub index: usize,
    pub message: String,
}

/// Where a failed image build went wrong, as far as the provider can tell
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureDetails {
    /// Name of the failed workflow step
    pub failed_step: Option<String>,
    pub error_message: Option<String>,
    /// Console link to the build's CloudWatch log group
    pub logs_url: Option<String>,
}

#[derive(Debug, Error)]
pub enum BuildError {
    /// A lookup found no resource with the given name
    #[error("{kind} '{name}' not found")]
    NotFound { kind: ResourceKind, name: String },

    /// Malformed or incomplete build spec
    #[error("Invalid build spec: {0}")]
    Validation(String),

    /// The provider reported something the build cannot proceed from
    #[error("Protocol violation: {0}")]
    FatalProtocol(String),

    /// The image build reached a failed or cancelled state
    #[error("Image build {status}: {reason}")]
    JobFailed {
        status: String,
        reason: String,
        image_arn: String,
        hints: Vec<&'static str>,
        details: FailureDetails,
    },

    #[error("Build cancelled")]
    Cancelled,

    #[error("Deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    /// Composite error from a collect-all batch
    #[error("{operation}: {} of {total} items failed: {}", .failures.len(), summarize(.failures))]
    Batch {
        operation: String,
        total: usize,
        failures: Vec<BatchFailure>,
    },
}

fn summarize(failures: &[BatchFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("[{}] {}", f.index, f.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl BuildError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BuildError::NotFound { .. })
    }

    /// Cancellation and deadline errors end a build without a provider failure
    pub fn is_interrupted(&self) -> bool {
        matches!(self, BuildError::Cancelled | BuildError::DeadlineExceeded(_))
    }
}

/// Find a [`BuildError`] anywhere in an error chain.
pub fn find_build_error(error: &anyhow::Error) -> Option<&BuildError> {
    error.chain().find_map(|cause| cause.downcast_ref::<BuildError>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn batch_display_lists_failures() {
        let err = BuildError::Batch {
            operation: "delete components".into(),
            total: 5,
            failures: vec![
                BatchFailure {
                    index: 1,
                    message: "in use".into(),
                },
                BatchFailure {
                    index: 3,
                    message: "throttled".into(),
                },
            ],
        };
        assert_eq!(
            err.to_string(),
            "delete components: 2 of 5 items failed: [1] in use; [3] throttled"
        );
    }

    #[test]
    fn not_found_display() {
        let err = BuildError::NotFound {
            kind: ResourceKind::InfrastructureConfig,
            name: "web-infra".into(),
        };
        assert_eq!(err.to_string(), "infrastructure configuration 'web-infra' not found");
        assert!(err.is_not_found());
    }

    #[test]
    fn find_through_context() {
        let err: anyhow::Error = Err::<(), _>(BuildError::Cancelled)
            .context("waiting for image")
            .unwrap_err();
        assert!(find_build_error(&err).is_some_and(BuildError::is_interrupted));

        let plain = anyhow::anyhow!("boom");
        assert!(find_build_error(&plain).is_none());
    }
}
