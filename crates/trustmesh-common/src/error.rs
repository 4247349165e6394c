//! Error types for the TrustMesh operator
//!
//! Errors are structured with fields to aid debugging in production. The
//! `is_retryable()` classification drives the controllers' error policy:
//! user-input problems never requeue, transient cluster problems do.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for TrustMesh operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Validation error for CRD specs
    #[error("validation error for {resource}: {message}")]
    Validation {
        /// Kind/name of the resource with invalid configuration
        resource: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.federation.federatesWith[2]")
        field: Option<String>,
    },

    /// Config rendering error (server.conf, controller-manager config, ...)
    #[error("rendering error: {message}")]
    Rendering {
        /// Description of what failed
        message: String,
        /// The document being rendered (if known)
        document: Option<String>,
    },

    /// Required environment configuration missing or malformed
    #[error("environment error [{variable}]: {message}")]
    Environment {
        /// Description of what failed
        message: String,
        /// The offending environment variable
        variable: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "reconciler", "status")
        context: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with resource context
    pub fn validation_for(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with resource context and field path
    pub fn validation_for_field(
        resource: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a rendering error with the given message
    pub fn rendering(msg: impl Into<String>) -> Self {
        Self::Rendering {
            message: msg.into(),
            document: None,
        }
    }

    /// Create a rendering error naming the document being produced
    pub fn rendering_for(document: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Rendering {
            message: msg.into(),
            document: Some(document.into()),
        }
    }

    /// Create an environment error for the given variable
    pub fn environment(variable: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Environment {
            message: msg.into(),
            variable: variable.into(),
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
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Validation, rendering and environment errors are not retryable — they
    /// require a spec or deployment change, which re-enqueues naturally.
    /// Optimistic-concurrency conflicts (409) are retryable: the next
    /// reconcile fetches a fresh resource version.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => match source {
                kube::Error::Api(ae) if ae.code == 409 => true,
                kube::Error::Api(ae) if (400..500).contains(&ae.code) => false,
                _ => true,
            },
            Error::Validation { .. } => false,
            Error::Rendering { .. } => false,
            Error::Environment { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Get the resource name if this error is associated with one
    pub fn resource(&self) -> Option<&str> {
        match self {
            Error::Validation { resource, .. } => Some(resource),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Story: spec validation catches misconfigurations before any child
    /// object is touched, and the error never requeues.
    #[test]
    fn story_validation_errors_do_not_requeue() {
        let err = Error::validation("caValidity must be at least defaultX509Validity");
        assert!(err.to_string().contains("validation error"));
        assert!(!err.is_retryable());

        let err = Error::validation_for_field(
            "SpireServer/cluster",
            "spec.federation.federatesWith[0]",
            "cannot federate with own trust domain",
        );
        match &err {
            Error::Validation { field, .. } => {
                assert_eq!(field.as_deref(), Some("spec.federation.federatesWith[0]"));
            }
            _ => panic!("expected Validation variant"),
        }
        assert_eq!(err.resource(), Some("SpireServer/cluster"));
    }

    /// Story: write conflicts retry, other 4xx responses do not.
    #[test]
    fn story_conflicts_retry_other_client_errors_do_not() {
        let conflict = Error::Kube {
            source: kube::Error::Api(kube::core::ErrorResponse {
                status: "Failure".into(),
                message: "operation cannot be fulfilled".into(),
                reason: "Conflict".into(),
                code: 409,
            }),
        };
        assert!(conflict.is_retryable());

        let forbidden = Error::Kube {
            source: kube::Error::Api(kube::core::ErrorResponse {
                status: "Failure".into(),
                message: "forbidden".into(),
                reason: "Forbidden".into(),
                code: 403,
            }),
        };
        assert!(!forbidden.is_retryable());
    }

    #[test]
    fn test_rendering_errors_are_permanent() {
        let err = Error::rendering_for("server.conf", "trust domain is empty");
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("trust domain is empty"));
    }

    #[test]
    fn test_environment_error_names_variable() {
        let err = Error::environment("OPERATOR_CONDITION_NAME", "must not be empty");
        assert!(err.to_string().contains("[OPERATOR_CONDITION_NAME]"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_internal_errors_retry() {
        let err = Error::internal_with_context("reconciler", "scheme lookup failed");
        assert!(err.is_retryable());
        assert!(err.to_string().contains("[reconciler]"));
    }
}
