//! Error taxonomy shared across crates.
//!
//! Each crate defines its own `thiserror` enum and classifies it into an
//! [`ErrorKind`]. The control router only ever looks at the kind, which maps
//! one-to-one onto the `$error` codes replied on the control bus.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Coarse classification of every failure the relay can surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// A control message could not be decoded.
    InvalidRequest,
    /// The named account is not configured.
    UnknownAccount,
    /// Upstream answered 429 and the retry policy gave up.
    RateLimited,
    /// Upstream rejected the credential.
    InvalidCredential,
    /// The refresh token itself has expired.
    RefreshTokenExpired,
    /// No refresh token is held (or the credential was cleared).
    NoRefreshToken,
    /// Socket close/error or an HTTP transport failure.
    TransportFailure,
    /// Anything else; logged with context where it happened.
    Failed,
}

impl ErrorKind {
    /// The `$error` code replied on the control bus.
    pub fn wire_code(self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid-request",
            Self::UnknownAccount
            | Self::InvalidCredential
            | Self::RefreshTokenExpired
            | Self::NoRefreshToken => "invalid-token",
            Self::RateLimited => "rate-limited",
            Self::TransportFailure | Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InvalidRequest => "invalid_request",
            Self::UnknownAccount => "unknown_account",
            Self::RateLimited => "rate_limited",
            Self::InvalidCredential => "invalid_credential",
            Self::RefreshTokenExpired => "refresh_token_expired",
            Self::NoRefreshToken => "no_refresh_token",
            Self::TransportFailure => "transport_failure",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_codes_collapse_credential_failures() {
        assert_eq!(ErrorKind::UnknownAccount.wire_code(), "invalid-token");
        assert_eq!(ErrorKind::InvalidCredential.wire_code(), "invalid-token");
        assert_eq!(ErrorKind::RefreshTokenExpired.wire_code(), "invalid-token");
        assert_eq!(ErrorKind::NoRefreshToken.wire_code(), "invalid-token");
    }

    #[test]
    fn wire_codes_for_remaining_kinds() {
        assert_eq!(ErrorKind::InvalidRequest.wire_code(), "invalid-request");
        assert_eq!(ErrorKind::RateLimited.wire_code(), "rate-limited");
        assert_eq!(ErrorKind::TransportFailure.wire_code(), "failed");
        assert_eq!(ErrorKind::Failed.wire_code(), "failed");
    }

    #[test]
    fn display_is_snake_case() {
        assert_eq!(ErrorKind::RateLimited.to_string(), "rate_limited");
        assert_eq!(ErrorKind::NoRefreshToken.to_string(), "no_refresh_token");
    }

    #[test]
    fn serde_uses_kebab_case() {
        let json = serde_json::to_string(&ErrorKind::RefreshTokenExpired).unwrap();
        assert_eq!(json, "\"refresh-token-expired\"");
    }
}
