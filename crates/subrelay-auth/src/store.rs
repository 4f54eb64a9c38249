//! Per-account credential lifecycle.
//!
//! A [`CredentialStore`] owns one [`Credential`] and keeps it usable:
//!
//! - [`CredentialStore::access_token`] refreshes first when the token expires
//!   within [`EXPIRY_SKEW_MS`].
//! - Refresh and validation are single-flight. The first caller starts the
//!   upstream call and parks a shared future in the state; everyone arriving
//!   while it runs awaits the same future and sees the same outcome.
//! - An upstream rejection of the credential clears it. Every later call
//!   fails fast with [`AuthError::NoRefreshToken`] until the account is
//!   reconfigured.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use subrelay_core::calculate_expires_at;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::AuthError;
use crate::oauth::OAuthClient;
use crate::secrets::SecretStore;
use crate::types::{Credential, TokenSnapshot, Validation};

/// Tokens expiring within this window are refreshed before use.
pub const EXPIRY_SKEW_MS: i64 = 5_000;

type SharedOp<T> = Shared<BoxFuture<'static, Result<T, AuthError>>>;

/// Keeps one account's bearer token valid. Cheap to clone.
#[derive(Clone)]
pub struct CredentialStore {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("secret_ref", &self.inner.secret_ref)
            .finish_non_exhaustive()
    }
}

struct Inner {
    secret_ref: String,
    oauth: OAuthClient,
    secrets: Arc<dyn SecretStore>,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    credential: Option<Credential>,
    validation: Option<Validation>,
    refreshing: Option<SharedOp<String>>,
    validating: Option<SharedOp<Validation>>,
}

impl CredentialStore {
    /// Load the credential stored under `secret_ref`.
    pub async fn load(
        secret_ref: &str,
        secrets: Arc<dyn SecretStore>,
        oauth: OAuthClient,
    ) -> Result<Self, AuthError> {
        if secret_ref.trim().is_empty() {
            return Err(AuthError::NotConfigured(secret_ref.to_string()));
        }
        let secret = secrets
            .load(secret_ref)
            .await?
            .ok_or_else(|| AuthError::NotConfigured(secret_ref.to_string()))?;
        let credential = secret
            .into_credential()
            .ok_or_else(|| AuthError::InvalidSecret(secret_ref.to_string()))?;
        debug!(secret = secret_ref, "loaded credential");
        Ok(Self::new(secret_ref, credential, secrets, oauth))
    }

    /// Wrap an already-loaded credential.
    pub fn new(
        secret_ref: impl Into<String>,
        credential: Credential,
        secrets: Arc<dyn SecretStore>,
        oauth: OAuthClient,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                secret_ref: secret_ref.into(),
                oauth,
                secrets,
                state: Mutex::new(State {
                    credential: Some(credential),
                    ..State::default()
                }),
            }),
        }
    }

    /// Reference of the backing secret.
    pub fn secret_ref(&self) -> &str {
        &self.inner.secret_ref
    }

    /// Application client id sent alongside the bearer token.
    pub fn client_id(&self) -> &str {
        self.inner.oauth.client_id()
    }

    /// A bearer token valid for at least [`EXPIRY_SKEW_MS`].
    pub async fn access_token(&self) -> Result<String, AuthError> {
        self.inner.access_token().await
    }

    /// Refresh the access token, joining an in-flight refresh if any.
    pub async fn refresh(&self) -> Result<String, AuthError> {
        self.inner.refresh().await
    }

    /// Cached validation, or the outcome of the single in-flight call.
    pub async fn validate(&self) -> Result<Validation, AuthError> {
        let op = {
            let mut state = self.inner.state.lock();
            if let Some(validation) = &state.validation {
                return Ok(validation.clone());
            }
            self.inner.validation_op(&mut state)
        };
        op.await
    }

    /// Point-in-time token plus identity.
    pub async fn snapshot(&self) -> Result<TokenSnapshot, AuthError> {
        let token = self.access_token().await?;
        let validation = self.validate().await?;
        Ok(TokenSnapshot::new(token, &validation))
    }

    /// Validate now and then every `interval` plus up to `jitter`.
    ///
    /// Any failure drops the cached validation and clears the credential, so
    /// later [`CredentialStore::access_token`] calls fail fast, and stops the
    /// task. Callers waiting on that validation see the same failure.
    pub fn spawn_periodic_validation(
        &self,
        interval: Duration,
        jitter: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        let jitter_ms = u64::try_from(jitter.as_millis()).unwrap_or(u64::MAX);
        tokio::spawn(async move {
            loop {
                let op = {
                    let mut state = inner.state.lock();
                    inner.validation_op(&mut state)
                };
                let outcome = tokio::select! {
                    () = cancel.cancelled() => break,
                    outcome = op => outcome,
                };

                match outcome {
                    Ok(validation) => debug!(
                        secret = %inner.secret_ref,
                        login = %validation.login,
                        expires_in = validation.expires_in,
                        "credential validated"
                    ),
                    Err(err) => {
                        warn!(
                            secret = %inner.secret_ref,
                            error = %err,
                            kind = %err.kind(),
                            "periodic validation failed, clearing credential"
                        );
                        inner.invalidate();
                        break;
                    }
                }
                let delay = interval + Duration::from_millis(rand::random_range(0..=jitter_ms));

                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }
            }
            debug!(secret = %inner.secret_ref, "periodic validation stopped");
        })
    }
}

impl Inner {
    async fn access_token(self: &Arc<Self>) -> Result<String, AuthError> {
        {
            let state = self.state.lock();
            match &state.credential {
                None => return Err(AuthError::NoRefreshToken),
                Some(c) if !c.expires_within(EXPIRY_SKEW_MS) => return Ok(c.access_token.clone()),
                Some(_) => {}
            }
        }
        self.refresh().await
    }

    async fn refresh(self: &Arc<Self>) -> Result<String, AuthError> {
        let op = {
            let mut state = self.state.lock();
            if let Some(op) = &state.refreshing {
                op.clone()
            } else {
                let inner = Arc::clone(self);
                let op = async move { inner.run_refresh().await }.boxed().shared();
                state.refreshing = Some(op.clone());
                op
            }
        };
        op.await
    }

    async fn run_refresh(self: Arc<Self>) -> Result<String, AuthError> {
        let result = self.do_refresh().await;
        self.state.lock().refreshing = None;
        result
    }

    async fn do_refresh(&self) -> Result<String, AuthError> {
        let current = self
            .state
            .lock()
            .credential
            .clone()
            .ok_or(AuthError::NoRefreshToken)?;
        // Another caller may have refreshed while this one queued.
        if !current.expires_within(EXPIRY_SKEW_MS) {
            return Ok(current.access_token);
        }
        let refresh_token = current
            .refresh_token
            .clone()
            .ok_or(AuthError::NoRefreshToken)?;
        if current.refresh_token_expired() {
            return Err(AuthError::RefreshTokenExpired);
        }

        let tokens = match self.oauth.refresh(&refresh_token).await {
            Ok(tokens) => tokens,
            Err(err @ AuthError::InvalidCredential { .. }) => {
                warn!(secret = %self.secret_ref, error = %err, "refresh rejected, clearing credential");
                self.invalidate();
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        let credential = Credential {
            access_token: tokens.access_token,
            access_token_expires_at: calculate_expires_at(tokens.expires_in),
            refresh_token: Some(tokens.refresh_token.unwrap_or(refresh_token)),
            refresh_token_expires_at: current.refresh_token_expires_at,
        };
        {
            let mut state = self.state.lock();
            state.credential = Some(credential.clone());
            state.validation = None;
        }
        info!(secret = %self.secret_ref, expires_at = credential.access_token_expires_at, "access token refreshed");

        if let Err(err) = self.secrets.update(&self.secret_ref, &credential).await {
            warn!(secret = %self.secret_ref, error = %err, "failed to persist refreshed credential");
        }
        Ok(credential.access_token)
    }

    /// The in-flight validation, or a new one parked in `state`.
    fn validation_op(self: &Arc<Self>, state: &mut State) -> SharedOp<Validation> {
        if let Some(op) = &state.validating {
            return op.clone();
        }
        let inner = Arc::clone(self);
        let op = async move { inner.run_validation().await }.boxed().shared();
        state.validating = Some(op.clone());
        op
    }

    async fn run_validation(self: Arc<Self>) -> Result<Validation, AuthError> {
        let result = match self.access_token().await {
            Ok(token) => self.oauth.validate(&token).await,
            Err(err) => Err(err),
        };

        let mut state = self.state.lock();
        state.validating = None;
        match &result {
            Ok(validation) => state.validation = Some(validation.clone()),
            Err(AuthError::InvalidCredential { .. }) => {
                state.validation = None;
                state.credential = None;
            }
            Err(_) => {}
        }
        result
    }

    fn invalidate(&self) {
        let mut state = self.state.lock();
        state.credential = None;
        state.validation = None;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
