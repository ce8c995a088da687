//! Error types for the registry operator
//!
//! Errors carry the instance they belong to where one is known, so log lines
//! and status messages can be traced back to a single managed registry.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for registry operator operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// The declared configuration cannot be honored
    #[error("configuration error for {instance}: {message}")]
    Configuration {
        /// Name of the registry instance
        instance: String,
        /// Description of what's wrong
        message: String,
        /// The offending field path (e.g., "spec.configuration.security.https.secretName")
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

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "flush", "finalizer")
        context: String,
    },
}

impl Error {
    /// Create a configuration error without instance context
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            instance: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a configuration error with instance context and field path
    pub fn configuration_for_field(
        instance: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Configuration {
            instance: instance.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
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
    /// Configuration and serialization errors need a spec or code fix.
    /// Kubernetes errors are retried unless the API rejected the request.
    /// A 409 conflict is retried: the next tick reads a fresh snapshot.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => match source {
                kube::Error::Api(status) => status.code == 409 || !(400..500).contains(&status.code),
                _ => true,
            },
            Error::Configuration { .. } => false,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Check if this error is a Kubernetes 404
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::Kube { source: kube::Error::Api(status) } if status.code == 404
        )
    }

    /// Get the instance name if this error is associated with one
    pub fn instance(&self) -> Option<&str> {
        match self {
            Error::Configuration { instance, .. } => Some(instance),
            _ => None,
        }
    }

    /// Get the context if this error has one
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Internal { context, .. } => Some(context),
            _ => None,
        }
    }
}
