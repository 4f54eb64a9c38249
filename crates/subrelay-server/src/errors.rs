//! Registry error types.

use subrelay_auth::AuthError;
use subrelay_core::ErrorKind;
use subrelay_session::SessionError;

/// Errors from account and subscription operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// No account with this name is configured.
    #[error("unknown account: {0}")]
    UnknownAccount(String),

    /// Credential failure.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The event stream could not be opened.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The registration request never got a response.
    #[error("HTTP error: {0}")]
    Http(String),

    /// A reply body could not be encoded.
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),

    /// Upstream answered 429 after the retry policy was exhausted.
    #[error("subscription registration rate limited")]
    RateLimited,

    /// Upstream rejected the registration.
    #[error("subscription registration failed ({status}): {message}")]
    Failed {
        /// HTTP status code.
        status: u16,
        /// Response body.
        message: String,
    },
}

impl RegistryError {
    /// Classification for the control bus.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownAccount(_) => ErrorKind::UnknownAccount,
            Self::Auth(e) => e.kind(),
            Self::Session(e) => e.kind(),
            Self::Http(_) => ErrorKind::TransportFailure,
            Self::RateLimited => ErrorKind::RateLimited,
            Self::Encode(_) | Self::Failed { .. } => ErrorKind::Failed,
        }
    }
}

impl From<reqwest::Error> for RegistryError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}
