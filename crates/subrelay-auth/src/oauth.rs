//! Upstream identity calls: token refresh and token validation.

use reqwest::StatusCode;
use serde::Deserialize;
use subrelay_core::RetryConfig;
use subrelay_core::http::{describe_failure, is_rate_limited, send_with_retry};
use subrelay_core::now_ms;

use crate::errors::AuthError;
use crate::types::Validation;

/// Endpoints and client identity for the identity provider.
#[derive(Clone, Debug)]
pub struct OAuthConfig {
    /// Token endpoint (refresh grant).
    pub token_url: String,
    /// Validation endpoint.
    pub validate_url: String,
    /// Application client id.
    pub client_id: String,
    /// 429 retry policy for both calls.
    pub retry: RetryConfig,
}

impl OAuthConfig {
    /// Derive both endpoints from the identity base URL.
    pub fn from_base(id_base_url: &str, client_id: impl Into<String>, retry: RetryConfig) -> Self {
        let base = id_base_url.trim_end_matches('/');
        Self {
            token_url: format!("{base}/oauth2/token"),
            validate_url: format!("{base}/oauth2/validate"),
            client_id: client_id.into(),
            retry,
        }
    }
}

/// Tokens returned by a successful refresh.
#[derive(Clone, Debug, Deserialize)]
pub struct RefreshedTokens {
    /// New access token.
    pub access_token: String,
    /// Rotated refresh token, when upstream issued one.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
}

#[derive(Deserialize)]
struct ValidateResponse {
    client_id: String,
    #[serde(default)]
    login: String,
    #[serde(default)]
    scopes: Vec<String>,
    #[serde(default)]
    user_id: String,
    expires_in: i64,
}

/// HTTP client for the identity provider.
#[derive(Clone, Debug)]
pub struct OAuthClient {
    http: reqwest::Client,
    config: OAuthConfig,
}

impl OAuthClient {
    /// Create a client with its own connection pool.
    pub fn new(config: OAuthConfig) -> Self {
        Self::with_http(reqwest::Client::new(), config)
    }

    /// Create a client sharing an existing connection pool.
    pub fn with_http(http: reqwest::Client, config: OAuthConfig) -> Self {
        Self { http, config }
    }

    /// The configured client id.
    pub fn client_id(&self) -> &str {
        &self.config.client_id
    }

    /// Exchange a refresh token for a new access token.
    #[tracing::instrument(skip_all)]
    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshedTokens, AuthError> {
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.config.client_id.as_str()),
        ];
        let resp = send_with_retry(&self.config.retry, || {
            self.http.post(&self.config.token_url).form(&form)
        })
        .await?;

        if resp.status() != StatusCode::OK {
            return Err(classify_failure("POST", resp).await);
        }
        Ok(resp.json().await?)
    }

    /// Ask upstream whether `access_token` is still valid.
    #[tracing::instrument(skip_all)]
    pub async fn validate(&self, access_token: &str) -> Result<Validation, AuthError> {
        let resp = send_with_retry(&self.config.retry, || {
            self.http
                .get(&self.config.validate_url)
                .bearer_auth(access_token)
        })
        .await?;

        if resp.status() != StatusCode::OK {
            return Err(classify_failure("GET", resp).await);
        }
        let data: ValidateResponse = resp.json().await?;
        Ok(Validation {
            client_id: data.client_id,
            login: data.login,
            scopes: data.scopes,
            user_id: data.user_id,
            expires_in: data.expires_in,
            validated_at: now_ms(),
        })
    }
}

/// 429 is rate limiting, other 4xx rejects the credential, anything else is
/// an upstream failure.
async fn classify_failure(method: &str, resp: reqwest::Response) -> AuthError {
    if is_rate_limited(&resp) {
        return AuthError::RateLimited;
    }
    let (status, message) = describe_failure(method, resp).await;
    if (400..500).contains(&status) {
        AuthError::InvalidCredential { status, message }
    } else {
        AuthError::Upstream { status, message }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
