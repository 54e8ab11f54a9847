//! Standardized mapping from raw HTTP outcomes to [`RegistryError`]

use crate::error::RegistryError;
use crate::registry::transport::TransportFault;
use serde::Deserialize;

/// Registry v2 error envelope: `{"errors":[{"code","message","detail"}]}`
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Builds terminal errors for non-2xx registry answers
pub struct HttpErrorHandler;

impl HttpErrorHandler {
    /// Map a terminal (non-retried) status to an error. `context` names the
    /// operation, e.g. `GET /v2/app/tags/list`.
    pub fn handle_registry_error(status: u16, body: &str, context: &str) -> RegistryError {
        match status {
            404 => RegistryError::NotFound(format!(
                "{}: {}",
                context,
                Self::summarize_body(body).unwrap_or_else(|| "resource does not exist".to_string())
            )),
            401 => RegistryError::Auth(format!(
                "{} still unauthorized after re-authentication: {}",
                context,
                Self::summarize_body(body).unwrap_or_else(|| body.to_string())
            )),
            _ => RegistryError::Registry {
                status,
                message: Self::summarize_body(body)
                    .unwrap_or_else(|| format!("{} failed", context)),
                body: body.to_string(),
            },
        }
    }

    /// Error raised once 5xx answers have exhausted the retry budget.
    pub fn handle_server_error(status: u16, body: &str, context: &str, attempts: u32) -> RegistryError {
        let detail = Self::summarize_body(body).unwrap_or_else(|| format!("HTTP {}", status));
        RegistryError::Connection(format!(
            "{} failed after {} attempts: {}",
            context, attempts, detail
        ))
    }

    /// Join the codes and messages of a registry error envelope into one line.
    /// Returns `None` when the body is not an envelope.
    pub fn summarize_body(body: &str) -> Option<String> {
        let envelope: ErrorEnvelope = serde_json::from_str(body).ok()?;
        if envelope.errors.is_empty() {
            return None;
        }

        let parts: Vec<String> = envelope
            .errors
            .into_iter()
            .map(|e| {
                let code = e.code.unwrap_or_else(|| "UNKNOWN".to_string());
                match e.message {
                    Some(message) => format!("{}: {}", code, message),
                    None => code,
                }
            })
            .collect();
        Some(parts.join("; "))
    }
}

/// Network error categorization
pub struct NetworkErrorHandler;

impl NetworkErrorHandler {
    /// Split a `reqwest` failure into the two fault kinds the retry loop knows.
    pub fn classify(error: &reqwest::Error, context: &str) -> TransportFault {
        if error.is_timeout() {
            TransportFault::Timeout(format!("{} timed out: {}", context, error))
        } else if error.is_connect() {
            TransportFault::Connection(format!("Connection error during {}: {}", context, error))
        } else if error.to_string().contains("certificate") {
            TransportFault::Connection(format!(
                "TLS certificate error during {}: {}",
                context, error
            ))
        } else {
            TransportFault::Connection(format!("{} network error: {}", context, error))
        }
    }

    /// Final error once transport faults have exhausted the retry budget.
    pub fn exhausted(fault: TransportFault, attempts: u32) -> RegistryError {
        match fault {
            TransportFault::Timeout(msg) => {
                RegistryError::Timeout(format!("{} (after {} attempts)", msg, attempts))
            }
            TransportFault::Connection(msg) => {
                RegistryError::Connection(format!("{} (after {} attempts)", msg, attempts))
            }
        }
    }
}
