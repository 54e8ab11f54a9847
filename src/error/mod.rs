//! Error types and handlers for registry operations

pub mod handlers;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RegistryError>;

/// Every failure the client can surface.
///
/// The type is `Clone` so a single in-flight computation can hand the same
/// outcome to every caller waiting on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Credential exchange failed, or the registry still answered 401 after re-authenticating
    #[error("Authentication error: {0}")]
    Auth(String),

    /// The registry answered 404
    #[error("Not found: {0}")]
    NotFound(String),

    /// Network failure or 5xx that outlived the retry budget
    #[error("Connection error: {0}")]
    Connection(String),

    /// Request deadline exceeded on every attempt
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Any other non-2xx answer, with the registry's body kept verbatim
    #[error("Registry error (HTTP {status}): {message}")]
    Registry {
        status: u16,
        message: String,
        body: String,
    },

    /// Malformed JSON or header from the registry
    #[error("Parse error: {0}")]
    Parse(String),

    /// Persistent cache store failure
    #[error("Cache error: {0}")]
    Cache(String),

    /// Invalid endpoint or client configuration
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RegistryError {
    /// Transient failures: callers may retry the whole operation later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RegistryError::Connection(_) | RegistryError::Timeout(_))
    }

    /// HTTP status carried by the error, when one is known.
    pub fn status(&self) -> Option<u16> {
        match self {
            RegistryError::NotFound(_) => Some(404),
            RegistryError::Registry { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Short message suitable for showing to an end user.
    pub fn user_message(&self) -> String {
        match self {
            RegistryError::NotFound(_) => "repository/tag not found".to_string(),
            RegistryError::Auth(_) => "registry authentication failed".to_string(),
            RegistryError::Connection(_) | RegistryError::Timeout(_) => {
                "registry unreachable, try again".to_string()
            }
            RegistryError::Registry { status: 403, .. } => {
                "access denied by the registry".to_string()
            }
            RegistryError::Registry { status, message, .. } => {
                format!("registry rejected the request (HTTP {status}): {message}")
            }
            RegistryError::Config(msg) => format!("invalid configuration: {msg}"),
            other => other.to_string(),
        }
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(err: serde_json::Error) -> Self {
        RegistryError::Parse(err.to_string())
    }
}

impl From<url::ParseError> for RegistryError {
    fn from(err: url::ParseError) -> Self {
        RegistryError::Config(err.to_string())
    }
}

impl From<sqlx::Error> for RegistryError {
    fn from(err: sqlx::Error) -> Self {
        RegistryError::Cache(err.to_string())
    }
}

impl From<tokio::task::JoinError> for RegistryError {
    fn from(err: tokio::task::JoinError) -> Self {
        RegistryError::Internal(format!("background task failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        assert!(RegistryError::Connection("reset".into()).is_retryable());
        assert!(RegistryError::Timeout("30s".into()).is_retryable());
        assert!(!RegistryError::Auth("denied".into()).is_retryable());
        assert!(!RegistryError::NotFound("app".into()).is_retryable());
    }

    #[test]
    fn user_messages_follow_error_kind() {
        assert_eq!(
            RegistryError::NotFound("x".into()).user_message(),
            "repository/tag not found"
        );
        assert_eq!(
            RegistryError::Auth("x".into()).user_message(),
            "registry authentication failed"
        );
        assert_eq!(
            RegistryError::Timeout("x".into()).user_message(),
            "registry unreachable, try again"
        );
    }

    #[test]
    fn registry_error_display_includes_status() {
        let err = RegistryError::Registry {
            status: 400,
            message: "NAME_INVALID: invalid repository name".into(),
            body: "{}".into(),
        };
        assert_eq!(
            err.to_string(),
            "Registry error (HTTP 400): NAME_INVALID: invalid repository name"
        );
        assert_eq!(err.status(), Some(400));
    }
}
