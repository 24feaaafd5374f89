//! FX tracker error types.

use thiserror::Error;

/// Where a failure originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Local preference store read, write or decode failure.
    Local,
    /// Remote pricing API failure.
    Remote,
}

/// Errors that can occur while syncing FX rates.
#[derive(Debug, Error)]
pub enum FxError {
    /// Preference store could not be read or written.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Stored or received data could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Request to the pricing API failed.
    #[error("Network error: {0}")]
    Network(String),

    /// Pricing API answered with an error.
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Failure that escaped normal error handling (e.g. a panic).
    #[error("Unexpected failure: {0}")]
    Unexpected(String),
}

impl FxError {
    /// Classify the failure as local or remote.
    pub fn kind(&self) -> FailureKind {
        match self {
            FxError::Storage(_)
            | FxError::Serialization(_)
            | FxError::Configuration(_)
            | FxError::Unexpected(_) => FailureKind::Local,
            FxError::Network(_) | FxError::Api { .. } => FailureKind::Remote,
        }
    }

    pub fn is_remote(&self) -> bool {
        self.kind() == FailureKind::Remote
    }

    /// Get a stable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            FxError::Storage(_) => "STORAGE_ERROR",
            FxError::Serialization(_) => "SERIALIZATION_ERROR",
            FxError::Network(_) => "NETWORK_ERROR",
            FxError::Api { .. } => "API_ERROR",
            FxError::Configuration(_) => "CONFIGURATION_ERROR",
            FxError::Unexpected(_) => "UNEXPECTED_FAILURE",
        }
    }
}

impl From<serde_json::Error> for FxError {
    fn from(e: serde_json::Error) -> Self {
        FxError::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for FxError {
    fn from(e: std::io::Error) -> Self {
        FxError::Storage(e.to_string())
    }
}

impl From<reqwest::Error> for FxError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            FxError::Serialization(e.to_string())
        } else {
            FxError::Network(e.to_string())
        }
    }
}

/// Result type for FX operations.
pub type FxResult<T> = Result<T, FxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kind() {
        assert_eq!(FxError::Storage("disk".into()).kind(), FailureKind::Local);
        assert_eq!(FxError::Serialization("json".into()).kind(), FailureKind::Local);
        assert!(FxError::Network("down".into()).is_remote());
        assert!(FxError::Api {
            status: 429,
            message: "rate limited".into()
        }
        .is_remote());
    }

    #[test]
    fn test_json_error_is_serialization() {
        let err: FxError = serde_json::from_str::<Vec<u8>>("{").unwrap_err().into();
        assert_eq!(err.error_code(), "SERIALIZATION_ERROR");
    }
}
