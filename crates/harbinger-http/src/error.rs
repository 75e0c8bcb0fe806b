//! Error types for HTTP fetching

use harbinger::{PreloadError, ResourceKey};
use thiserror::Error;

/// Result type for HTTP operations
pub type Result<T> = std::result::Result<T, HttpError>;

/// Errors that can occur while fetching a page
#[derive(Error, Debug)]
pub enum HttpError {
    /// The server answered with a non-success status
    #[error("HTTP error: {status}")]
    Http { status: u16 },

    /// Network connection failed
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Request timeout
    #[error("Request timeout")]
    Timeout,

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Client configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl HttpError {
    /// Check if the server reported an error of its own
    pub fn is_server_error(&self) -> bool {
        matches!(self, HttpError::Http { status } if *status >= 500)
    }

    /// Convert into the engine's error for `key`
    pub fn into_preload_error(self, key: &ResourceKey) -> PreloadError {
        match self {
            HttpError::Http { status } if status >= 500 => PreloadError::ServerError {
                key: key.clone(),
                status,
            },
            other => PreloadError::Transport(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for HttpError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            HttpError::Timeout
        } else if let Some(status) = e.status() {
            HttpError::Http {
                status: status.as_u16(),
            }
        } else {
            HttpError::Connection(e.to_string())
        }
    }
}

impl From<url::ParseError> for HttpError {
    fn from(e: url::ParseError) -> Self {
        HttpError::InvalidUrl(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_errors_keep_their_status() {
        let key = ResourceKey::from("https://example.com/a");

        let err = HttpError::Http { status: 503 }.into_preload_error(&key);
        assert_eq!(err, PreloadError::ServerError { key, status: 503 });
    }

    #[test]
    fn test_client_errors_are_transport_failures() {
        let key = ResourceKey::from("https://example.com/a");

        assert!(!HttpError::Http { status: 404 }.is_server_error());
        assert!(matches!(
            HttpError::Http { status: 404 }.into_preload_error(&key),
            PreloadError::Transport(_)
        ));
        assert!(matches!(
            HttpError::Timeout.into_preload_error(&key),
            PreloadError::Transport(_)
        ));
    }
}
