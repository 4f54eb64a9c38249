//! Credential and validation types.

use serde::{Deserialize, Serialize};
use subrelay_core::time::ms_to_rfc3339;
use subrelay_core::now_ms;

/// Service tag stored alongside every secret this crate owns.
pub const SERVICE_TAG: &str = "twitch";

/// An OAuth token pair with absolute expiries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    /// Bearer token for API requests.
    pub access_token: String,
    /// Absolute expiry of the access token, ms since Unix epoch.
    pub access_token_expires_at: i64,
    /// Token used to obtain a new access token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Absolute expiry of the refresh token, if upstream reported one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token_expires_at: Option<i64>,
}

impl Credential {
    /// Whether the access token expires within `skew_ms` from now.
    pub fn expires_within(&self, skew_ms: i64) -> bool {
        self.access_token_expires_at - skew_ms < now_ms()
    }

    /// Whether the refresh token's own expiry has passed.
    pub fn refresh_token_expired(&self) -> bool {
        self.refresh_token_expires_at
            .is_some_and(|at| at < now_ms())
    }
}

/// Secret metadata.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretMetadata {
    /// Service the secret belongs to.
    #[serde(default)]
    pub service: String,
}

/// One entry in the secret store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StoredSecret {
    /// An OAuth token pair.
    #[serde(rename_all = "camelCase")]
    OauthToken {
        /// The tokens.
        value: Credential,
        /// Service tag.
        #[serde(default)]
        metadata: SecretMetadata,
    },
    /// A plain string secret (not usable as a credential).
    #[serde(rename_all = "camelCase")]
    Plain {
        /// The secret value.
        value: String,
        /// Service tag.
        #[serde(default)]
        metadata: SecretMetadata,
    },
}

impl StoredSecret {
    /// Wrap a credential tagged for this service.
    pub fn oauth(credential: Credential) -> Self {
        Self::OauthToken {
            value: credential,
            metadata: SecretMetadata {
                service: SERVICE_TAG.to_string(),
            },
        }
    }

    /// The credential, if this is an OAuth token tagged for this service.
    pub fn into_credential(self) -> Option<Credential> {
        match self {
            Self::OauthToken { value, metadata } if metadata.service == SERVICE_TAG => Some(value),
            _ => None,
        }
    }
}

/// Cached result of the upstream validation call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Validation {
    /// Client id the token was issued to.
    pub client_id: String,
    /// Login of the token owner.
    pub login: String,
    /// Granted scopes.
    pub scopes: Vec<String>,
    /// User id of the token owner.
    pub user_id: String,
    /// Seconds the token remained valid at validation time.
    pub expires_in: i64,
    /// When the validation ran, ms since Unix epoch.
    pub validated_at: i64,
}

impl Validation {
    /// Absolute expiry derived from the validation response.
    pub fn expires_at_ms(&self) -> i64 {
        self.validated_at + self.expires_in.saturating_mul(1000)
    }
}

/// Point-in-time view of a credential, replied to snapshot requests.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenSnapshot {
    /// Currently valid bearer token.
    pub access_token: String,
    /// Client id the token was issued to.
    pub client_id: String,
    /// Login of the token owner.
    pub login: String,
    /// Granted scopes.
    pub scopes: Vec<String>,
    /// User id of the token owner.
    pub user_id: String,
    /// RFC 3339 expiry reported by validation.
    pub expires_at: String,
}

impl TokenSnapshot {
    /// Compose a snapshot from a token and its validation.
    pub fn new(access_token: String, validation: &Validation) -> Self {
        Self {
            access_token,
            client_id: validation.client_id.clone(),
            login: validation.login.clone(),
            scopes: validation.scopes.clone(),
            user_id: validation.user_id.clone(),
            expires_at: ms_to_rfc3339(validation.expires_at_ms()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn credential(expires_at: i64) -> Credential {
        Credential {
            access_token: "tok".into(),
            access_token_expires_at: expires_at,
            refresh_token: Some("ref".into()),
            refresh_token_expires_at: None,
        }
    }

    #[test]
    fn expires_within_skew() {
        assert!(credential(now_ms() + 1000).expires_within(5000));
        assert!(!credential(now_ms() + 60_000).expires_within(5000));
    }

    #[test]
    fn refresh_token_expiry() {
        let mut cred = credential(0);
        assert!(!cred.refresh_token_expired());
        cred.refresh_token_expires_at = Some(now_ms() - 1);
        assert!(cred.refresh_token_expired());
    }

    #[test]
    fn stored_secret_wire_shape() {
        let secret = StoredSecret::oauth(credential(42));
        let json = serde_json::to_value(&secret).unwrap();
        assert_eq!(json["type"], "oauthToken");
        assert_eq!(json["metadata"]["service"], "twitch");
        assert_eq!(json["value"]["accessTokenExpiresAt"], 42);
        assert!(json["value"].get("refreshTokenExpiresAt").is_none());
    }

    #[test]
    fn into_credential_checks_service() {
        let ok = StoredSecret::oauth(credential(1));
        assert!(ok.into_credential().is_some());

        let wrong_service = StoredSecret::OauthToken {
            value: credential(1),
            metadata: SecretMetadata {
                service: "other".into(),
            },
        };
        assert!(wrong_service.into_credential().is_none());

        let plain = StoredSecret::Plain {
            value: "x".into(),
            metadata: SecretMetadata::default(),
        };
        assert!(plain.into_credential().is_none());
    }

    #[test]
    fn snapshot_serializes_camel_case() {
        let validation = Validation {
            client_id: "cid".into(),
            login: "someone".into(),
            scopes: vec!["chat:read".into()],
            user_id: "123".into(),
            expires_in: 10,
            validated_at: 0,
        };
        let snapshot = TokenSnapshot::new("tok".into(), &validation);
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["accessToken"], "tok");
        assert_eq!(json["clientId"], "cid");
        assert_eq!(json["userId"], "123");
        assert_eq!(json["expiresAt"], "1970-01-01T00:00:10.000Z");
    }
}
