//! Auth error types.

use subrelay_core::ErrorKind;

/// Errors that can occur during credential operations.
///
/// `Clone` because a single refresh or validation outcome is handed to every
/// caller waiting on it; upstream library errors are captured as strings.
#[derive(Clone, Debug, thiserror::Error)]
pub enum AuthError {
    /// HTTP request failed before a response was received.
    #[error("HTTP error: {0}")]
    Http(String),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(String),

    /// Secret file I/O error.
    #[error("I/O error: {0}")]
    Io(String),

    /// No secret is configured under the given reference.
    #[error("no credential configured for secret: {0}")]
    NotConfigured(String),

    /// The stored secret is not an OAuth token for this service.
    #[error("secret {0} is not an OAuth token for this service")]
    InvalidSecret(String),

    /// The credential holds no refresh token (or was cleared).
    #[error("no refresh token")]
    NoRefreshToken,

    /// The refresh token's own expiry has passed.
    #[error("refresh token expired; re-authentication required")]
    RefreshTokenExpired,

    /// Upstream answered 429 after the retry policy was exhausted.
    #[error("rate limited by upstream")]
    RateLimited,

    /// Upstream rejected the credential (4xx other than 429).
    #[error("credential rejected ({status}): {message}")]
    InvalidCredential {
        /// HTTP status code.
        status: u16,
        /// Response body.
        message: String,
    },

    /// Upstream failed for another reason (5xx, unexpected status).
    #[error("OAuth error ({status}): {message}")]
    Upstream {
        /// HTTP status code.
        status: u16,
        /// Response body.
        message: String,
    },
}

impl AuthError {
    /// Classification for the control bus.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Http(_) | Self::Upstream { .. } => ErrorKind::TransportFailure,
            Self::Json(_) | Self::Io(_) => ErrorKind::Failed,
            Self::NotConfigured(_) | Self::InvalidSecret(_) | Self::InvalidCredential { .. } => {
                ErrorKind::InvalidCredential
            }
            Self::NoRefreshToken => ErrorKind::NoRefreshToken,
            Self::RefreshTokenExpired => ErrorKind::RefreshTokenExpired,
            Self::RateLimited => ErrorKind::RateLimited,
        }
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl From<std::io::Error> for AuthError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
