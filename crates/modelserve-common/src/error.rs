//! Error types for the modelserve operator
//!
//! Variants carry the resource they concern so a log line is actionable on
//! its own. [`Error::is_retryable`] separates transient store failures (retry
//! with backoff) from permanent ones (a rejected child, a bad spec).

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for modelserve operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API or transport error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// The API server refused to create a child object
    #[error("{kind} {name} rejected by API server ({code}): {message}")]
    Rejected {
        /// Kind of the child (Deployment, Service, ...)
        kind: String,
        /// Name of the child
        name: String,
        /// HTTP status returned by the API server
        code: u16,
        /// Server-provided reason
        message: String,
    },

    /// A ServeRequest is unusable as written
    #[error("validation error for {request}: {message}")]
    Validation {
        /// Name of the ServeRequest
        request: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.replicas")
        field: Option<String>,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// A reconcile invocation ran past its deadline
    #[error("reconcile of {request} timed out after {seconds}s")]
    Timeout {
        /// Name of the ServeRequest
        request: String,
        /// Deadline that expired
        seconds: u64,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Where the error occurred (e.g. "reconciler", "webhook")
        context: String,
    },
}

impl Error {
    /// Create a validation error naming the request and field
    pub fn validation_for_field(
        request: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            request: request.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a rejection error for a child create
    pub fn rejected(
        kind: impl Into<String>,
        name: impl Into<String>,
        code: u16,
        msg: impl Into<String>,
    ) -> Self {
        Self::Rejected {
            kind: kind.into(),
            name: name.into(),
            code,
            message: msg.into(),
        }
    }

    /// Create a serialization error for a resource kind
    pub fn serialization_for(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a timeout error
    pub fn timeout(request: impl Into<String>, seconds: u64) -> Self {
        Self::Timeout {
            request: request.into(),
            seconds,
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(msg: impl Into<String>, context: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Whether retrying the same operation can succeed without a spec change
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => match source {
                // Stale writes and throttling clear up on their own
                kube::Error::Api(ae) if ae.code == 409 || ae.code == 429 => true,
                kube::Error::Api(ae) => !(400..500).contains(&ae.code),
                _ => true,
            },
            Error::Rejected { .. } => false,
            Error::Validation { .. } => false,
            Error::Serialization { .. } => false,
            Error::Timeout { .. } => true,
            Error::Internal { .. } => true,
        }
    }

    /// True for a child create refused by the API server
    pub fn is_rejection(&self) -> bool {
        matches!(self, Error::Rejected { .. })
    }

    /// True for a 409 from the API server (lost create race or stale write)
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Kube { source: kube::Error::Api(ae) } if ae.code == 409)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization {
            message: e.to_string(),
            kind: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16) -> Error {
        Error::from(kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "boom".to_string(),
            reason: "Test".to_string(),
            code,
        }))
    }

    #[test]
    fn story_rejected_child_is_not_retryable() {
        let err = Error::rejected("Deployment", "demo", 422, "invalid image");
        assert!(!err.is_retryable());
        assert!(err.is_rejection());
        assert_eq!(
            err.to_string(),
            "Deployment demo rejected by API server (422): invalid image"
        );
    }

    #[test]
    fn story_store_errors_classified_by_status() {
        assert!(api_error(500).is_retryable());
        assert!(api_error(503).is_retryable());
        assert!(api_error(409).is_retryable());
        assert!(api_error(429).is_retryable());
        assert!(!api_error(403).is_retryable());
        assert!(!api_error(422).is_retryable());
    }

    #[test]
    fn story_stale_status_write_is_a_conflict() {
        assert!(api_error(409).is_conflict());
        assert!(!api_error(500).is_conflict());
        assert!(!Error::rejected("Service", "demo", 409, "exists").is_conflict());
    }

    #[test]
    fn story_timeouts_are_transient() {
        let err = Error::timeout("demo", 30);
        assert!(err.is_retryable());
        assert!(err.to_string().contains("timed out after 30s"));
    }

    #[test]
    fn story_validation_carries_field() {
        let err = Error::validation_for_field("demo", "spec.replicas", "replicas cannot exceed 5");
        match err {
            Error::Validation { request, field, .. } => {
                assert_eq!(request, "demo");
                assert_eq!(field.as_deref(), Some("spec.replicas"));
            }
            _ => panic!("expected validation error"),
        }
    }

    #[test]
    fn story_error_construction_ergonomics() {
        let err = Error::internal_with_context("no uid", "reconciler");
        assert_eq!(err.to_string(), "internal error [reconciler]: no uid");
        assert!(Error::internal("x").to_string().contains(UNKNOWN_CONTEXT));
        let err = Error::serialization_for("ConfigMap", "bad yaml");
        assert!(!err.is_retryable());
    }
}
