//! Error types for freshtoken.

use thiserror::Error;

/// Primary error type for session operations.
///
/// Most of these never cross the public refresh boundary: the coordinator and
/// scheduler log them and report a `bool`/`Option` outcome instead. They do
/// surface from configuration loading, storage backends and transports.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Token decode error: {0}")]
    Decode(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Refresh endpoint returned status {status}")]
    Http { status: u16 },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl SessionError {
    /// Whether this error came from the refresh exchange itself, as opposed
    /// to local storage or configuration.
    pub fn is_exchange_failure(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Http { .. } | Self::InvalidResponse(_) | Self::Timeout(_)
        )
    }
}

impl From<reqwest::Error> for SessionError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            tracing::debug!(error = %error, "Request timed out; limit unknown here");
            return Self::Timeout(0);
        }
        match error.status() {
            Some(status) => Self::Http {
                status: status.as_u16(),
            },
            None => Self::Network(error.to_string()),
        }
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl From<base64::DecodeError> for SessionError {
    fn from(error: base64::DecodeError) -> Self {
        Self::Decode(error.to_string())
    }
}

impl From<toml::de::Error> for SessionError {
    fn from(error: toml::de::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl From<toml::ser::Error> for SessionError {
    fn from(error: toml::ser::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, SessionError>;
