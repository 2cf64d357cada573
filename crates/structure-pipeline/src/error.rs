//! Error types for the structure pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline errors
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The pipeline could not come up
    #[error("Startup error: {0}")]
    Startup(String),

    /// No worker slot could be obtained for a submission
    #[error("Unable to spawn worker: {0}")]
    Spawn(String),

    /// The chemistry step rejected the molecule
    #[error("{0}")]
    Normalization(String),

    /// A store write or read failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// The payload stream could not be read
    #[error("Failed to read payload '{payload}': {message}")]
    Stream { payload: String, message: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a spawn error
    pub fn spawn(message: impl Into<String>) -> Self {
        Self::Spawn(message.into())
    }

    /// Create a normalization error
    pub fn normalization(message: impl Into<String>) -> Self {
        Self::Normalization(message.into())
    }

    /// Create a persistence error
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence(message.into())
    }

    /// Create a stream error
    pub fn stream(payload: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Stream {
            payload: payload.into(),
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization_message_is_bare() {
        let err = Error::normalization("unclosed ring 1");
        assert_eq!(err.to_string(), "unclosed ring 1");
    }

    #[test]
    fn test_stream_message_names_payload() {
        let err = Error::stream("library.sdf", "truncated record");
        assert_eq!(
            err.to_string(),
            "Failed to read payload 'library.sdf': truncated record"
        );
    }
}
