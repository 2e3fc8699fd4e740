//! AWS error classification and handling
//!
//! SDK errors are classified once, where they are produced, using the
//! `.code()` metadata instead of string matching on the Debug format. The
//! classified [`AwsError`] is attached as context so callers further up can
//! recover it with `downcast_ref` while the original SDK error stays in the chain.

use crate::error::BuildError;
use aws_sdk_imagebuilder::error::{ProvideErrorMetadata, SdkError};
use thiserror::Error;

/// AWS error categories for fallback and retry logic
#[derive(Debug, Error)]
pub enum AwsError {
    /// Resource was not found (safe to skip in cleanup)
    #[error("Resource not found: {resource_type} '{resource_id}'")]
    NotFound {
        resource_type: &'static str,
        resource_id: String,
    },

    /// Resource already exists (fall back to lookup in create operations)
    #[error("Resource already exists: {message}")]
    AlreadyExists { message: String },

    /// Rate limit exceeded (retryable with backoff)
    #[error("Rate limit exceeded")]
    Throttled,

    /// Service or network temporarily unavailable (retryable)
    #[error("Service temporarily unavailable: {message}")]
    Unavailable { message: String },

    /// Resource is still referenced by another resource
    #[error("Resource is in use: {message}")]
    InUse { message: String },

    /// Generic AWS SDK error with code and message
    #[error("AWS error: {message}")]
    Sdk {
        code: Option<String>,
        message: String,
    },
}

impl AwsError {
    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, AwsError::NotFound { .. })
    }

    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        matches!(self, AwsError::Throttled | AwsError::Unavailable { .. })
    }

    /// Check if this is an "already exists" error
    pub fn is_already_exists(&self) -> bool {
        matches!(self, AwsError::AlreadyExists { .. })
    }

    /// Get a user-friendly suggestion for resolving this error, if available.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            AwsError::Sdk { code: Some(c), .. } => suggestion_for_code(c),
            AwsError::Throttled => suggestion_for_code("ThrottlingException"),
            _ => None,
        }
    }
}

/// Coarse classification the orchestration core branches on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    NotFound,
    AlreadyExists,
    Transient,
    Other,
}

impl From<&AwsError> for ErrorClass {
    fn from(error: &AwsError) -> Self {
        if error.is_not_found() {
            ErrorClass::NotFound
        } else if error.is_already_exists() {
            ErrorClass::AlreadyExists
        } else if error.is_retryable() {
            ErrorClass::Transient
        } else {
            ErrorClass::Other
        }
    }
}

/// Known AWS error codes for "not found" conditions
const NOT_FOUND_CODES: &[&str] = &[
    "ResourceNotFoundException",
    "InvalidAMIID.NotFound",
    "InvalidAMIID.Unavailable",
    "InvalidSnapshot.NotFound",
];

/// Known AWS error codes for "already exists" conditions
const ALREADY_EXISTS_CODES: &[&str] = &[
    "ResourceAlreadyExistsException",
    "InvalidVersionNumberException",
    "InvalidPermission.Duplicate",
];

/// Known AWS error codes for throttling/rate limiting
const THROTTLING_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "TooManyRequestsException",
    "CallRateLimitExceededException",
    "RequestLimitExceeded",
];

/// Known AWS error codes for transient service failures
const UNAVAILABLE_CODES: &[&str] = &[
    "ServiceUnavailableException",
    "ServiceException",
    "InternalError",
    "Unavailable",
];

/// Known AWS error codes for resources still referenced elsewhere
const IN_USE_CODES: &[&str] = &["ResourceInUseException", "ResourceDependencyException"];

/// Classify an AWS SDK error using the error code.
pub fn classify_aws_error(code: Option<&str>, message: Option<&str>) -> AwsError {
    let message = message.unwrap_or("Unknown error").to_string();

    match code {
        Some(c) if NOT_FOUND_CODES.contains(&c) => AwsError::NotFound {
            resource_type: "resource",
            resource_id: message,
        },
        Some(c) if ALREADY_EXISTS_CODES.contains(&c) => AwsError::AlreadyExists { message },
        Some(c) if THROTTLING_CODES.contains(&c) => AwsError::Throttled,
        Some(c) if UNAVAILABLE_CODES.contains(&c) => AwsError::Unavailable { message },
        Some(c) if IN_USE_CODES.contains(&c) => AwsError::InUse { message },
        // Image Builder reports name collisions on some operations as a bad request
        Some("InvalidParameterValueException") if message.contains("already exists") => {
            AwsError::AlreadyExists { message }
        }
        _ => AwsError::Sdk {
            code: code.map(|s| s.to_string()),
            message,
        },
    }
}

/// Convert an SDK error into an `anyhow::Error` carrying its classification.
///
/// Dispatch failures and timeouts never reach the service and carry no code,
/// so they are classified as [`AwsError::Unavailable`].
pub fn sdk_error<E, R>(err: SdkError<E, R>) -> anyhow::Error
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    let classified = match &err {
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => AwsError::Unavailable {
            message: err.to_string(),
        },
        _ => classify_aws_error(err.code(), err.message()),
    };
    anyhow::Error::new(err).context(classified)
}

/// Classify an error from an anyhow::Error.
///
/// Looks for an [`AwsError`] attached by [`sdk_error`] first, then for a
/// [`BuildError::NotFound`] produced by lookups. Falls back to string matching
/// on the Debug representation if no typed error is found.
pub fn classify_anyhow_error(error: &anyhow::Error) -> ErrorClass {
    if let Some(aws) = error.downcast_ref::<AwsError>() {
        return ErrorClass::from(aws);
    }
    for cause in error.chain() {
        if let Some(aws) = cause.downcast_ref::<AwsError>() {
            return ErrorClass::from(aws);
        }
        if let Some(build) = cause.downcast_ref::<BuildError>() {
            if build.is_not_found() {
                return ErrorClass::NotFound;
            }
        }
    }

    let debug_str = format!("{:?}", error);
    match extract_error_code(&debug_str) {
        Some(code) => ErrorClass::from(&classify_aws_error(Some(&code), Some(&debug_str))),
        None => ErrorClass::Other,
    }
}

/// Extract a known AWS error code from a debug string representation
fn extract_error_code(debug_str: &str) -> Option<String> {
    let known = NOT_FOUND_CODES
        .iter()
        .chain(ALREADY_EXISTS_CODES)
        .chain(THROTTLING_CODES)
        .chain(UNAVAILABLE_CODES)
        .chain(IN_USE_CODES);
    for code in known {
        if debug_str.contains(code) {
            return Some((*code).to_string());
        }
    }

    // Try to extract any code from `code: Some("...")` pattern
    if let Some(start) = debug_str.find("code: Some(\"") {
        let rest = &debug_str[start + 12..];
        if let Some(end) = rest.find('"') {
            return Some(rest[..end].to_string());
        }
    }

    None
}

/// Error code to user-friendly suggestion mapping
const SUGGESTIONS: &[(&str, &str)] = &[
    (
        "ServiceQuotaExceededException",
        "Request a service limit increase via the AWS Service Quotas console.",
    ),
    (
        "AccessDeniedException",
        "Check that your credentials allow imagebuilder:* and ec2:CreateTags.",
    ),
    (
        "UnauthorizedOperation",
        "Check that your credentials allow the EC2 image operations.",
    ),
    (
        "InvalidParameterCombinationException",
        "Check the build spec for conflicting target settings.",
    ),
    (
        "ThrottlingException",
        "AWS API rate limit hit. Lower batch concurrency or retry later.",
    ),
];

/// Get a user-friendly suggestion for a known error code.
fn suggestion_for_code(code: &str) -> Option<String> {
    SUGGESTIONS
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, s)| (*s).to_string())
}
