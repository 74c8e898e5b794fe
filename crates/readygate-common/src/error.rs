//! Error types for readygate
//!
//! Configuration problems are caught once at startup and are never retried.
//! Everything raised during reconciliation carries enough context to tell
//! which node or collaborator failed.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for readygate operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Invalid or unreadable handler configuration
    #[error("configuration error: {message}")]
    Config {
        /// Description of what's invalid
        message: String,
        /// The offending field path (e.g., "daemonsets[0].namespace")
        field: Option<String>,
    },

    /// Node selector expression that does not parse
    #[error("invalid node selector {expression:?}: {message}")]
    Selector {
        /// The full expression being parsed
        expression: String,
        /// Description of the syntax problem
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "reconciler", "leader")
        context: String,
    },
}

impl Error {
    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
            field: None,
        }
    }

    /// Create a configuration error pointing at a specific field
    pub fn config_for_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a selector syntax error
    pub fn selector(expression: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Selector {
            expression: expression.into(),
            message: msg.into(),
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
    /// Configuration and selector errors need an operator to fix the config.
    /// A 409 Conflict is retryable: a fresh fetch resolves it.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code) && ae.code != 409
            ),
            Error::Config { .. } => false,
            Error::Selector { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Whether this error is a stale-write conflict from the API server
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Kube { source: kube::Error::Api(ae) } if ae.code == 409)
    }

    /// Get the context if this error has one
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Internal { context, .. } => Some(context),
            Error::Config { field, .. } => field.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16) -> Error {
        Error::from(kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: "boom".to_string(),
            reason: "Test".to_string(),
            code,
        }))
    }

    /// Story: a broken config file is reported once with the offending field
    #[test]
    fn story_config_errors_name_the_field() {
        let err = Error::config_for_field("daemonsets[1].namespace", "must not be empty");
        assert!(err.to_string().contains("configuration error"));
        assert!(err.to_string().contains("must not be empty"));
        assert_eq!(err.context(), Some("daemonsets[1].namespace"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn selector_errors_quote_the_expression() {
        let err = Error::selector("zone in (a", "unterminated value list");
        assert!(err.to_string().contains("\"zone in (a\""));
        assert!(!err.is_retryable());
    }

    #[test]
    fn conflicts_are_retryable_but_other_client_errors_are_not() {
        assert!(api_error(409).is_retryable());
        assert!(api_error(409).is_conflict());
        assert!(!api_error(422).is_retryable());
        assert!(!api_error(403).is_conflict());
        assert!(api_error(500).is_retryable());
    }

    #[test]
    fn internal_error_defaults_to_unknown_context() {
        let err = Error::internal("unexpected state");
        assert_eq!(err.context(), Some(UNKNOWN_CONTEXT));
        assert!(err.to_string().contains("[unknown]"));
        assert!(err.is_retryable());

        let err = Error::internal_with_context("leader", "lease lost");
        assert!(err.to_string().contains("[leader]"));
    }
}
