//! Inference error types.
//!
//! All errors implement `std::error::Error` via `thiserror`. Structured logging
//! is the caller's responsibility; these types carry the context needed to
//! build meaningful log entries.

use thiserror::Error;

/// Errors that can occur while talking to the model endpoint.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// No API key was available in the environment.
    #[error("missing credentials: {var} is not set")]
    MissingCredentials {
        var: String,
    },

    /// TCP/HTTP connection to the model endpoint failed.
    #[error("connection failed to {endpoint}: {reason}")]
    ConnectionFailed {
        endpoint: String,
        reason: String,
    },

    /// The model endpoint did not respond within the configured timeout.
    #[error("inference timeout after {duration_secs}s")]
    Timeout {
        duration_secs: u64,
    },

    /// Non-2xx HTTP response from the model endpoint.
    #[error("HTTP {status}: {body}")]
    HttpError {
        status: u16,
        body: String,
    },

    /// The response body did not match the Responses API shape.
    #[error("response parse error: {reason}")]
    ParseError {
        reason: String,
    },

    /// Client construction or configuration error.
    #[error("config error: {reason}")]
    ConfigError {
        reason: String,
    },
}

impl InferenceError {
    /// Whether retrying the same request may succeed.
    ///
    /// Connection failures, timeouts, rate limiting (429) and server-side
    /// errors (5xx) are transient. Everything else is final.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            InferenceError::ConnectionFailed { .. }
                | InferenceError::Timeout { .. }
                | InferenceError::HttpError { status: 429, .. }
                | InferenceError::HttpError { status: 500..=599, .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_retriable() {
        assert!(InferenceError::ConnectionFailed {
            endpoint: "".into(),
            reason: "".into()
        }
        .is_retriable());
        assert!(InferenceError::Timeout { duration_secs: 5 }.is_retriable());
        assert!(InferenceError::HttpError {
            status: 429,
            body: "rate limited".into()
        }
        .is_retriable());
        assert!(InferenceError::HttpError {
            status: 503,
            body: "".into()
        }
        .is_retriable());

        assert!(!InferenceError::HttpError {
            status: 400,
            body: "bad request".into()
        }
        .is_retriable());
        assert!(!InferenceError::HttpError {
            status: 401,
            body: "invalid api key".into()
        }
        .is_retriable());
        assert!(!InferenceError::ParseError {
            reason: "".into()
        }
        .is_retriable());
        assert!(!InferenceError::MissingCredentials {
            var: "OPENAI_API_KEY".into()
        }
        .is_retriable());
    }

    #[test]
    fn test_missing_credentials_display() {
        let err = InferenceError::MissingCredentials {
            var: "OPENAI_API_KEY".into(),
        };
        assert_eq!(err.to_string(), "missing credentials: OPENAI_API_KEY is not set");
    }
}
