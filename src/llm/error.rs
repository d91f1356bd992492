//! Transport error taxonomy for model calls.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("rate limited by provider")]
    RateLimited { retry_after: Option<Duration> },

    #[error("provider unavailable (HTTP {0})")]
    Unavailable(u16),

    #[error("provider internal error (HTTP {0})")]
    ServerError(u16),

    #[error("request timed out")]
    Timeout,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("provider rejected request (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("request could not be sent: {0}")]
    InvalidRequest(String),
}

impl LlmError {
    /// Map a non-success HTTP status to an error.
    pub fn from_status(status: u16, body: String, retry_after: Option<Duration>) -> Self {
        match status {
            429 => Self::RateLimited { retry_after },
            503 | 529 => Self::Unavailable(status),
            500 | 502 => Self::ServerError(status),
            408 | 504 => Self::Timeout,
            _ => Self::Api {
                status,
                message: body,
            },
        }
    }

    /// Whether the failure is expected to clear on its own.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::Unavailable(_)
                | Self::ServerError(_)
                | Self::Timeout
                | Self::Connection(_)
        )
    }

    /// Server-provided wait hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

// Only network-level failures are transient. Builder, body and redirect
// errors fail the same way on every attempt.
impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::InvalidResponse(err.to_string())
        } else if let Some(status) = err.status() {
            Self::from_status(status.as_u16(), err.to_string(), None)
        } else if err.is_builder() || err.is_body() || err.is_redirect() {
            Self::InvalidRequest(err.to_string())
        } else if err.is_connect() || err.is_request() {
            Self::Connection(err.to_string())
        } else {
            Self::InvalidRequest(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_statuses() {
        assert!(LlmError::from_status(429, String::new(), None).is_transient());
        assert!(LlmError::from_status(503, String::new(), None).is_transient());
        assert!(LlmError::from_status(529, String::new(), None).is_transient());
        assert!(LlmError::from_status(500, String::new(), None).is_transient());
        assert!(LlmError::from_status(504, String::new(), None).is_transient());

        assert!(!LlmError::from_status(400, "bad".to_string(), None).is_transient());
        assert!(!LlmError::from_status(401, String::new(), None).is_transient());
        assert!(!LlmError::InvalidResponse("x".to_string()).is_transient());
        assert!(LlmError::Connection("reset by peer".to_string()).is_transient());
    }

    #[test]
    fn builder_errors_are_permanent() {
        let err = reqwest::Client::new().get("not a url").build().unwrap_err();
        let err = LlmError::from(err);
        assert!(matches!(err, LlmError::InvalidRequest(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn refused_connection_is_transient() {
        let err = reqwest::Client::new()
            .get("http://127.0.0.1:1/")
            .send()
            .await
            .unwrap_err();
        let err = LlmError::from(err);
        assert!(matches!(err, LlmError::Connection(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn retry_after_only_on_rate_limit() {
        let err = LlmError::from_status(429, String::new(), Some(Duration::from_secs(3)));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));
        assert_eq!(LlmError::Unavailable(503).retry_after(), None);
    }
}
