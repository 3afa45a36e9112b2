//! AWS error classification and handling
//!
//! Provides typed errors for AWS SDK operations using the `.code()` method
//! instead of string matching on Debug format. Teardown paths use
//! [`ignore_not_found`] so deleting an already-gone resource is a no-op.

use aws_sdk_ec2::error::{ProvideErrorMetadata, SdkError};
use thiserror::Error;

/// AWS error categories for retry and teardown logic
#[derive(Debug, Error)]
pub enum AwsError {
    /// Resource was not found (safe to skip in teardown)
    #[error("Resource not found: {message}")]
    NotFound { message: String },

    /// Resource already exists (safe to ignore in create operations)
    #[error("Resource already exists")]
    AlreadyExists,

    /// IAM role not yet visible to the consuming service (eventual
    /// consistency, retryable)
    #[error("IAM role not yet visible (eventual consistency)")]
    RolePropagationDelay,

    /// Rate limit exceeded (retryable with backoff)
    #[error("Rate limit exceeded")]
    Throttled,

    /// Resource has dependent objects (retryable, e.g., SG with attached ENI)
    #[error("Resource has dependent objects")]
    DependencyViolation,

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
        matches!(
            self,
            AwsError::RolePropagationDelay | AwsError::Throttled | AwsError::DependencyViolation
        )
    }

    /// Check if this is an "already exists" error
    pub fn is_already_exists(&self) -> bool {
        matches!(self, AwsError::AlreadyExists)
    }
}

/// Known AWS error codes for "not found" conditions across the services
/// webship touches (EC2, ELBv2, ECS, IAM, Route 53, ACM, Auto Scaling)
const NOT_FOUND_CODES: &[&str] = &[
    "InvalidGroup.NotFound",
    "InvalidPermission.NotFound",
    "LoadBalancerNotFound",
    "TargetGroupNotFound",
    "ListenerNotFound",
    "ClusterNotFoundException",
    "ServiceNotFoundException",
    "ServiceNotActiveException",
    "NoSuchEntity",
    "NoSuchHostedZone",
    "ResourceNotFoundException",
    "ObjectNotFoundException",
];

/// Known AWS error codes for "already exists" conditions
const ALREADY_EXISTS_CODES: &[&str] = &[
    "InvalidGroup.Duplicate",
    "InvalidPermission.Duplicate",
    "EntityAlreadyExists",
    "DuplicateLoadBalancerName",
    "DuplicateTargetGroupName",
    "DuplicateListener",
];

/// Known AWS error codes for throttling/rate limiting
const THROTTLING_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "RequestLimitExceeded",
    "TooManyRequestsException",
];

/// Known AWS error codes for dependency violations (resource still in use)
const DEPENDENCY_CODES: &[&str] = &["DependencyViolation", "ResourceInUse", "ResourceInUseException"];

/// Classify an AWS SDK error using the error code.
pub fn classify_aws_error(code: Option<&str>, message: Option<&str>) -> AwsError {
    let message = message.unwrap_or("Unknown error").to_string();

    match code {
        Some(c) if NOT_FOUND_CODES.contains(&c) => AwsError::NotFound { message },
        Some(c) if ALREADY_EXISTS_CODES.contains(&c) => AwsError::AlreadyExists,
        Some(c) if THROTTLING_CODES.contains(&c) => AwsError::Throttled,
        Some(c) if DEPENDENCY_CODES.contains(&c) => AwsError::DependencyViolation,
        // ECS reports a not-yet-propagated execution role as a parameter error
        Some("InvalidParameterException") if message.contains("unable to assume") => {
            AwsError::RolePropagationDelay
        }
        Some("InvalidParameterException") if message.contains("does not have an execution role") => {
            AwsError::RolePropagationDelay
        }
        _ => AwsError::Sdk {
            code: code.map(|s| s.to_string()),
            message,
        },
    }
}

/// Classify an error from an anyhow::Error by extracting the AWS error code.
///
/// Walks the error chain and falls back to scanning the Debug representation,
/// which covers every SDK operation type without enumerating them.
pub fn classify_anyhow_error(error: &anyhow::Error) -> AwsError {
    let debug_str = format!("{error:?}");
    if let Some(code) = extract_error_code(&debug_str) {
        return classify_aws_error(Some(&code), Some(&debug_str));
    }

    AwsError::Sdk {
        code: None,
        message: error.to_string(),
    }
}

/// Turn a "not found" SDK error into `Ok(None)` and pass everything else on.
///
/// Deletion paths call this so teardown is idempotent: a resource someone
/// already removed does not fail the rest of the teardown.
pub fn ignore_not_found<T, E, R>(result: Result<T, SdkError<E, R>>) -> anyhow::Result<Option<T>>
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            let classified = classify_aws_error(e.code(), e.message());
            if classified.is_not_found() {
                Ok(None)
            } else {
                Err(anyhow::Error::new(e))
            }
        }
    }
}

/// All known AWS error codes for extraction from debug strings (flat list)
const ALL_KNOWN_CODES: &[&str] = &[
    // Not found
    "InvalidGroup.NotFound",
    "InvalidPermission.NotFound",
    "LoadBalancerNotFound",
    "TargetGroupNotFound",
    "ListenerNotFound",
    "ClusterNotFoundException",
    "ServiceNotFoundException",
    "ServiceNotActiveException",
    "NoSuchEntity",
    "NoSuchHostedZone",
    "ResourceNotFoundException",
    "ObjectNotFoundException",
    // Already exists
    "InvalidGroup.Duplicate",
    "InvalidPermission.Duplicate",
    "EntityAlreadyExists",
    "DuplicateLoadBalancerName",
    "DuplicateTargetGroupName",
    "DuplicateListener",
    // Throttling
    "Throttling",
    "ThrottlingException",
    "RequestLimitExceeded",
    "TooManyRequestsException",
    // Dependency
    "DependencyViolation",
    "ResourceInUse",
    "ResourceInUseException",
    // Quota
    "LimitExceededException",
    "TooManyCertificates",
    "TooManyLoadBalancers",
    "TooManyTargetGroups",
];

/// Extract an AWS error code from a debug string representation
fn extract_error_code(debug_str: &str) -> Option<String> {
    for code in ALL_KNOWN_CODES {
        if debug_str.contains(code) {
            return Some((*code).to_string());
        }
    }

    // ECS role-propagation failures carry a generic code
    if debug_str.contains("InvalidParameterException") && debug_str.contains("unable to assume") {
        return Some("InvalidParameterException".to_string());
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
