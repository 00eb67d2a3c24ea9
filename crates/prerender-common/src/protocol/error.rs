use serde_json::Value;
use thiserror::Error;

use crate::protocol::render::ErrorBody;

/// Terminal failure of a package fetch, after the retry schedule is
/// exhausted. Cloneable so that every waiter coalesced onto one fetch can
/// receive the same outcome.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("failed to fetch {url}: {cause}")]
pub struct FetchFailure {
    /// The package URL that could not be fetched
    pub url: String,
    /// HTTP status of the last attempt, if the server responded at all
    pub last_status: Option<u16>,
    /// Human-readable cause of the final attempt's failure
    pub cause: String,
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("{message}")]
    InvalidInput { message: String, value: Option<Value> },

    #[error("Missing or invalid secret")]
    BadSecret,

    #[error(transparent)]
    Fetch(#[from] FetchFailure),

    #[error("render failed: {0}")]
    Sandbox(String),

    #[error("render timed out after {0}ms")]
    RenderTimeout(u64),

    #[error("{0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RenderError {
    /// Shorthand for an input error without an offending value attached.
    pub fn invalid(message: impl Into<String>) -> Self {
        RenderError::InvalidInput {
            message: message.into(),
            value: None,
        }
    }

    /// Input error carrying the offending value back to the caller.
    pub fn invalid_value(message: impl Into<String>, value: Value) -> Self {
        RenderError::InvalidInput {
            message: message.into(),
            value: Some(value),
        }
    }

    /// Whether this error is the caller's fault (400) rather than a pipeline
    /// failure (500).
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            RenderError::InvalidInput { .. } | RenderError::BadSecret
        )
    }

    /// Converts into the stable `{error, value?, stack?}` response schema.
    ///
    /// Input errors carry the offending `value`; pipeline errors carry a
    /// `stack` with the underlying cause chain.
    pub fn to_body(&self) -> ErrorBody {
        match self {
            RenderError::InvalidInput { message, value } => ErrorBody {
                error: message.clone(),
                value: value.clone(),
                stack: None,
            },
            RenderError::BadSecret => ErrorBody {
                error: self.to_string(),
                value: None,
                stack: None,
            },
            RenderError::Fetch(failure) => ErrorBody {
                error: failure.to_string(),
                value: None,
                stack: Some(match failure.last_status {
                    Some(status) => format!("last status: {}", status),
                    None => failure.cause.clone(),
                }),
            },
            other => ErrorBody {
                error: other.to_string(),
                value: None,
                stack: Some(other.to_string()),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, RenderError>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_input_error_classification() {
        assert!(RenderError::invalid("urls must be a list").is_input_error());
        assert!(RenderError::BadSecret.is_input_error());

        let fetch = RenderError::Fetch(FetchFailure {
            url: "https://cdn.example.com/a.js".into(),
            last_status: Some(404),
            cause: "status 404".into(),
        });
        assert!(!fetch.is_input_error());
        assert!(!RenderError::Sandbox("boom".into()).is_input_error());
        assert!(!RenderError::RenderTimeout(30_000).is_input_error());
    }

    #[test]
    fn test_invalid_input_body_carries_value() {
        let err = RenderError::invalid_value("props must be an object", json!("foo"));
        let body = err.to_body();
        assert_eq!(body.error, "props must be an object");
        assert_eq!(body.value, Some(json!("foo")));
        assert!(body.stack.is_none());
    }

    #[test]
    fn test_fetch_body_carries_stack() {
        let err = RenderError::Fetch(FetchFailure {
            url: "https://cdn.example.com/a.js".into(),
            last_status: Some(500),
            cause: "status 500".into(),
        });
        let body = err.to_body();
        assert!(body.error.contains("https://cdn.example.com/a.js"));
        assert_eq!(body.stack.as_deref(), Some("last status: 500"));
    }

    #[test]
    fn test_bad_secret_message_is_stable() {
        // The exact message is part of the HTTP contract.
        assert_eq!(
            RenderError::BadSecret.to_string(),
            "Missing or invalid secret"
        );
    }

    #[test]
    fn test_fetch_failure_display() {
        let failure = FetchFailure {
            url: "https://cdn.example.com/a.js".into(),
            last_status: None,
            cause: "connection refused".into(),
        };
        assert_eq!(
            failure.to_string(),
            "failed to fetch https://cdn.example.com/a.js: connection refused"
        );
    }
}
