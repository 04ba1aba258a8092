//! Common error types for xremu.

use thiserror::Error;

/// Result type alias using xremu's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for storage and configuration operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (settings file, anchor table, control script)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Store or settings file present but unreadable as configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a serialization error from any displayable type.
    pub fn serialization(msg: impl std::fmt::Display) -> Self {
        Self::Serialization(msg.to_string())
    }

    /// Create a config error from any displayable type.
    pub fn config(msg: impl std::fmt::Display) -> Self {
        Self::Config(msg.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::config("store.json: expected value at line 1 column 1");
        assert_eq!(
            err.to_string(),
            "configuration error: store.json: expected value at line 1 column 1"
        );
    }

    #[test]
    fn test_json_error_maps_to_serialization() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: Error = parse.unwrap_err().into();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
