//! Error types for preloading

use crate::ResourceKey;
use thiserror::Error;

/// Result type for preload operations
pub type Result<T> = std::result::Result<T, PreloadError>;

/// Errors that can occur while preloading a single resource.
///
/// Policy rejections are not errors; they surface as
/// [`Preload::Skipped`](crate::Preload::Skipped). Every variant here is local
/// to one key and never affects sibling preloads.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PreloadError {
    /// The transport failed before a response was received
    #[error("Transport error: {0}")]
    Transport(String),

    /// The server answered with a recognized error signal
    #[error("Server error for {key}: status {status}")]
    ServerError { key: ResourceKey, status: u16 },

    /// The fetch succeeded but the result failed validation
    #[error("Malformed result for {key}: {reason}")]
    MalformedResult { key: ResourceKey, reason: String },

    /// The queued work was dropped before it produced a result
    #[error("Preload cancelled")]
    Cancelled,
}

impl PreloadError {
    /// Check if this is a server error signal
    pub fn is_server_error(&self) -> bool {
        matches!(self, PreloadError::ServerError { .. })
    }
}

/// Errors raised while building or configuring the engine
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A configuration value is out of range
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// The configuration file could not be parsed
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A required collaborator was not supplied to the builder
    #[error("Missing collaborator: {0}")]
    MissingCollaborator(&'static str),
}
