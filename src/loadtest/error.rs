//! Error types for the load testing engine.
//!
//! Defines [`LoadTestError`] for configuration and run-setup errors and
//! [`RequestError`] for transport failures observed while driving the
//! anagram service. Request errors are never fatal to a run: the workflow
//! turns them into failed checks.

/// Errors that occur during config parsing, validation, client setup, or report I/O.
#[derive(Debug, thiserror::Error)]
pub enum LoadTestError {
    /// TOML parse failure -- the config file contains invalid TOML syntax
    /// or does not match the expected schema.
    #[error("Failed to parse config TOML: {source}")]
    ConfigParse {
        #[from]
        source: toml::de::Error,
    },

    /// Semantic validation failure -- the config parsed successfully but
    /// contains invalid values (e.g., no stages, malformed threshold).
    #[error("Config validation error: {message}")]
    ConfigValidation { message: String },

    /// File I/O failure -- the config file could not be read from disk.
    #[error("Failed to read config file '{path}': {source}")]
    ConfigIo {
        source: std::io::Error,
        path: String,
    },

    /// The HTTP client could not be constructed.
    #[error("Failed to build HTTP client: {message}")]
    Client { message: String },

    /// The JSON report could not be serialized or written.
    #[error("Failed to write report: {message}")]
    Report { message: String },
}

impl LoadTestError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
        }
    }
}

/// Transport-level failures for a single request against the anagram service.
///
/// A response with an unexpected status code is NOT a `RequestError`; it is
/// a normal response whose status check fails.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// The request exceeded the configured per-request timeout.
    #[error("Request timed out")]
    Timeout,

    /// Connection-level failure (DNS resolution, TCP connect, TLS handshake).
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// The request could not be built or sent (e.g., invalid multipart part).
    #[error("Request error: {message}")]
    Request { message: String },

    /// Status line arrived but the body could not be read.
    #[error("Failed to read response body: {message}")]
    Body { message: String },
}

impl RequestError {
    /// Returns the error category as a static string for metrics classification.
    ///
    /// Categories: `"timeout"`, `"connection"`, `"request"`, `"body"`.
    pub fn error_category(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Connection { .. } => "connection",
            Self::Request { .. } => "request",
            Self::Body { .. } => "body",
        }
    }

    /// Classify a [`reqwest::Error`] into the appropriate [`RequestError`] variant.
    pub fn classify_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connection {
                message: err.to_string(),
            }
        } else if err.is_body() || err.is_decode() {
            Self::Body {
                message: err.to_string(),
            }
        } else if err.is_builder() || err.is_request() {
            Self::Request {
                message: err.to_string(),
            }
        } else {
            Self::Connection {
                message: err.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category_timeout() {
        assert_eq!(RequestError::Timeout.error_category(), "timeout");
    }

    #[test]
    fn test_error_category_connection() {
        let err = RequestError::Connection {
            message: "connection refused".to_string(),
        };
        assert_eq!(err.error_category(), "connection");
    }

    #[test]
    fn test_error_category_request_and_body() {
        let req = RequestError::Request {
            message: "bad mime".to_string(),
        };
        let body = RequestError::Body {
            message: "eof".to_string(),
        };
        assert_eq!(req.error_category(), "request");
        assert_eq!(body.error_category(), "body");
    }

    #[test]
    fn test_validation_helper_message() {
        let err = LoadTestError::validation("at least one [[stage]] is required");
        assert_eq!(
            err.to_string(),
            "Config validation error: at least one [[stage]] is required"
        );
    }

    #[tokio::test]
    async fn test_classify_reqwest_connection_refused() {
        // Port 1 is reserved and nothing listens there.
        let client = reqwest::Client::new();
        let err = client
            .get("http://127.0.0.1:1/")
            .send()
            .await
            .expect_err("nothing listens on port 1");
        let classified = RequestError::classify_reqwest(&err);
        assert_eq!(classified.error_category(), "connection");
    }
}
