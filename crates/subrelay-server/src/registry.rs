//! Accounts, their sessions, and subscription registration.
//!
//! Each account holds at most one live [`Session`]. The session is opened
//! lazily by the first registration and replaced, never mutated, across
//! reconnects. Registrations and reconnect hand-offs on one account are
//! serialized by the account's registration lock; accounts never share
//! mutable state.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use reqwest::StatusCode;
use subrelay_auth::{CredentialStore, TokenSnapshot};
use subrelay_core::RetryConfig;
use subrelay_core::http::{describe_failure, is_rate_limited, send_with_retry};
use subrelay_session::{Connector, Session, SessionConfig, SessionError, SessionEvent, close_code};
use subrelay_settings::RelaySettings;
use tracing::{debug, info, instrument, warn};

use crate::bus::HostBus;
use crate::errors::RegistryError;
use crate::subscriptions::{SubscriptionRecord, SubscriptionSet};

/// Where sessions connect and registrations go.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Event-stream URL for the first connection of each account.
    pub eventsub_url: String,
    /// API base; registrations POST to `{helix_base_url}/eventsub/subscriptions`.
    pub helix_base_url: String,
    /// Session tuning.
    pub session: SessionConfig,
    /// 429 retry policy for registrations.
    pub retry: RetryConfig,
}

impl RegistryConfig {
    /// Derive from loaded settings.
    pub fn from_settings(settings: &RelaySettings) -> Self {
        let eventsub = &settings.eventsub;
        Self {
            eventsub_url: eventsub.url.clone(),
            helix_base_url: settings.api.helix_base_url.clone(),
            session: SessionConfig {
                buffer_capacity: eventsub.buffer_capacity,
                high_water_mark: eventsub.high_water_mark,
                seen_id_horizon: std::time::Duration::from_secs(eventsub.seen_id_horizon_secs),
                initial_keepalive: std::time::Duration::from_secs(eventsub.initial_keepalive_secs),
            },
            retry: settings.retry.clone(),
        }
    }

    fn subscriptions_url(&self) -> String {
        format!(
            "{}/eventsub/subscriptions",
            self.helix_base_url.trim_end_matches('/')
        )
    }
}

struct Account {
    name: String,
    credentials: CredentialStore,
    session: Mutex<Option<Arc<Session>>>,
    records: Mutex<SubscriptionSet>,
    registration: tokio::sync::Mutex<()>,
}

impl Account {
    /// The installed session, unless it has already closed.
    fn live_session(&self) -> Option<Arc<Session>> {
        self.session
            .lock()
            .as_ref()
            .filter(|s| !s.is_closed())
            .cloned()
    }

    /// Clear the slot if it still holds `session`.
    fn clear_session(&self, session: &Arc<Session>) {
        let mut slot = self.session.lock();
        if slot.as_ref().is_some_and(|s| Arc::ptr_eq(s, session)) {
            *slot = None;
        }
    }
}

/// Shared by the registry and every consumption loop.
struct Context {
    config: RegistryConfig,
    connector: Arc<dyn Connector>,
    bus: Arc<dyn HostBus>,
    http: reqwest::Client,
}

/// All configured accounts.
pub struct AccountRegistry {
    accounts: HashMap<String, Arc<Account>>,
    ctx: Arc<Context>,
}

impl AccountRegistry {
    /// Empty registry.
    pub fn new(
        config: RegistryConfig,
        connector: Arc<dyn Connector>,
        bus: Arc<dyn HostBus>,
    ) -> Self {
        Self {
            accounts: HashMap::new(),
            ctx: Arc::new(Context {
                config,
                connector,
                bus,
                http: reqwest::Client::new(),
            }),
        }
    }

    /// Add an account under its lower-cased name. `false` if the name is
    /// blank or already taken.
    pub fn add_account(&mut self, name: &str, credentials: CredentialStore) -> bool {
        let name = name.trim().to_lowercase();
        if name.is_empty() || self.accounts.contains_key(&name) {
            warn!(account = %name, "skipping blank or duplicate account");
            return false;
        }
        let account = Account {
            name: name.clone(),
            credentials,
            session: Mutex::new(None),
            records: Mutex::new(SubscriptionSet::default()),
            registration: tokio::sync::Mutex::new(()),
        };
        let _ = self.accounts.insert(name, Arc::new(account));
        true
    }

    /// Configured account names, sorted.
    pub fn account_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.accounts.keys().cloned().collect();
        names.sort();
        names
    }

    /// Credential store of `account`.
    pub fn credentials(&self, account: &str) -> Option<CredentialStore> {
        self.account(account).ok().map(|a| a.credentials.clone())
    }

    /// Subscriptions `account` holds, in registration order.
    pub fn subscriptions(&self, account: &str) -> Vec<SubscriptionRecord> {
        self.account(account)
            .map(|a| a.records.lock().to_vec())
            .unwrap_or_default()
    }

    /// Id of `account`'s live session.
    pub fn session_id(&self, account: &str) -> Option<String> {
        self.account(account)
            .ok()?
            .live_session()
            .and_then(|s| s.session_id())
    }

    /// Token snapshot for `account`.
    pub async fn snapshot(&self, account: &str) -> Result<TokenSnapshot, RegistryError> {
        let account = self.account(account)?;
        Ok(account.credentials.snapshot().await?)
    }

    /// Make sure `account` holds `record`, registering it upstream if not.
    ///
    /// Opens the account's session first if there is none, re-registering
    /// every record already held on it. On failure nothing is recorded.
    #[instrument(skip_all, fields(account = %account, kind = %record.kind))]
    pub async fn ensure_subscription(
        &self,
        account: &str,
        record: SubscriptionRecord,
    ) -> Result<(), RegistryError> {
        let account = self.account(account)?;
        let _registration = account.registration.lock().await;

        if account.records.lock().contains(&record) {
            debug!("subscription already held");
            return Ok(());
        }

        let token = account.credentials.access_token().await?;
        let session = match account.live_session() {
            Some(session) => session,
            None => {
                // Registrations die with their session; re-issue what we hold.
                let session = self.ctx.open_session(&account).await?;
                if let Err(e) = self.ctx.reregister(&account, &session).await {
                    account.clear_session(&session);
                    session.close(close_code::NORMAL).await;
                    return Err(e);
                }
                session
            }
        };
        let session_id = session.session_id().ok_or(SessionError::NotActive)?;

        self.ctx
            .register(&account, &token, &record, &session_id)
            .await?;
        let _ = account.records.lock().insert(record);
        Ok(())
    }

    /// Close every account's session with [`close_code::NORMAL`].
    pub async fn shutdown(&self) {
        for account in self.accounts.values() {
            let session = account.session.lock().take();
            if let Some(session) = session {
                info!(account = %account.name, "closing event stream");
                session.close(close_code::NORMAL).await;
            }
        }
    }

    fn account(&self, name: &str) -> Result<Arc<Account>, RegistryError> {
        self.accounts
            .get(&name.to_lowercase())
            .cloned()
            .ok_or_else(|| RegistryError::UnknownAccount(name.to_string()))
    }
}

impl Context {
    /// Open the first session of `account`, install it, and start consuming.
    async fn open_session(
        self: &Arc<Self>,
        account: &Arc<Account>,
    ) -> Result<Arc<Session>, RegistryError> {
        let session = Arc::new(
            Session::open(
                self.connector.as_ref(),
                &self.config.eventsub_url,
                self.config.session.clone(),
            )
            .await?,
        );
        *account.session.lock() = Some(Arc::clone(&session));
        self.spawn_consumer(account, Arc::clone(&session));
        Ok(session)
    }

    /// POST one registration. Success and "already exists" both count.
    async fn register(
        &self,
        account: &Account,
        token: &str,
        record: &SubscriptionRecord,
        session_id: &str,
    ) -> Result<(), RegistryError> {
        let url = self.config.subscriptions_url();
        let body = record.registration_body(session_id);
        let resp = send_with_retry(&self.config.retry, || {
            self.http
                .post(&url)
                .bearer_auth(token)
                .header("Client-Id", account.credentials.client_id())
                .json(&body)
        })
        .await?;

        let status = resp.status();
        if status.is_success() || status == StatusCode::CONFLICT {
            info!(
                account = %account.name,
                kind = %record.kind,
                session_id,
                status = status.as_u16(),
                "subscription registered"
            );
            return Ok(());
        }
        if is_rate_limited(&resp) {
            warn!(account = %account.name, kind = %record.kind, "subscription registration rate limited");
            return Err(RegistryError::RateLimited);
        }
        let (status, message) = describe_failure("POST", resp).await;
        Err(RegistryError::Failed { status, message })
    }

    fn spawn_consumer(self: &Arc<Self>, account: &Arc<Account>, session: Arc<Session>) {
        let ctx = Arc::clone(self);
        let account = Arc::clone(account);
        let _ = tokio::spawn(async move { ctx.consume(account, session).await });
    }

    /// Drain one session until it closes or is superseded.
    async fn consume(self: Arc<Self>, account: Arc<Account>, session: Arc<Session>) {
        while let Some(event) = session.next().await {
            match event {
                SessionEvent::Notification(notification) => {
                    let topic = notification.subscription.kind.clone();
                    match serde_json::to_value(&notification) {
                        Ok(payload) => self.bus.publish(&topic, payload).await,
                        Err(e) => warn!(account = %account.name, error = %e, "failed to encode notification"),
                    }
                }
                SessionEvent::Welcome(_) => {}
                SessionEvent::Reconnect(reconnect) => {
                    match self
                        .hand_off(&account, &session, &reconnect.reconnect_url)
                        .await
                    {
                        Ok(()) => return,
                        Err(e) => warn!(
                            account = %account.name,
                            error = %e,
                            "reconnect hand-off failed, keeping current session"
                        ),
                    }
                }
                SessionEvent::Close { code } => {
                    info!(
                        account = %account.name,
                        code,
                        reason = close_code::describe(code),
                        "event stream closed"
                    );
                    account.clear_session(&session);
                    return;
                }
            }
        }
        account.clear_session(&session);
    }

    /// Move `account` from `old` to a new session at `url`.
    ///
    /// Every held record is registered on the new session before the old one
    /// is retired. On failure the new session is closed and `old` stays.
    #[instrument(skip(self, account, old), fields(account = %account.name))]
    async fn hand_off(
        self: &Arc<Self>,
        account: &Arc<Account>,
        old: &Arc<Session>,
        url: &str,
    ) -> Result<(), RegistryError> {
        info!("reconnecting event stream");
        let new = Arc::new(
            Session::open(self.connector.as_ref(), url, self.config.session.clone()).await?,
        );

        let _registration = account.registration.lock().await;
        if let Err(e) = self.reregister(account, &new).await {
            new.close(close_code::NORMAL).await;
            return Err(e);
        }

        *account.session.lock() = Some(Arc::clone(&new));
        new.combine(old);
        self.spawn_consumer(account, new);
        info!("event stream handed off");
        Ok(())
    }

    async fn reregister(&self, account: &Account, session: &Session) -> Result<(), RegistryError> {
        let records = account.records.lock().to_vec();
        if records.is_empty() {
            return Ok(());
        }
        let session_id = session.session_id().ok_or(SessionError::NotActive)?;
        let token = account.credentials.access_token().await?;
        for record in &records {
            self.register(account, &token, record, &session_id).await?;
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::ChannelBus;
    use subrelay_auth::{Credential, FileSecretStore, OAuthClient, OAuthConfig};
    use subrelay_core::now_ms;
    use subrelay_session::memory::MemoryConnector;
    use tempfile::TempDir;

    fn credentials(dir: &TempDir) -> CredentialStore {
        let credential = Credential {
            access_token: "a1".into(),
            access_token_expires_at: now_ms() + 3_600_000,
            refresh_token: Some("r1".into()),
            refresh_token_expires_at: None,
        };
        let secrets = Arc::new(FileSecretStore::new(dir.path().join("secrets.json")));
        let oauth = OAuthClient::new(OAuthConfig::from_base(
            "http://127.0.0.1:9",
            "cid",
            RetryConfig::no_retries(),
        ));
        CredentialStore::new("main", credential, secrets, oauth)
    }

    fn registry() -> AccountRegistry {
        let (connector, _servers) = MemoryConnector::new();
        let (bus, _handle) = ChannelBus::new(1);
        let config = RegistryConfig {
            eventsub_url: "memory://eventsub".into(),
            helix_base_url: "http://127.0.0.1:9/helix/".into(),
            session: SessionConfig::default(),
            retry: RetryConfig::no_retries(),
        };
        AccountRegistry::new(config, Arc::new(connector), Arc::new(bus))
    }

    #[test]
    fn subscriptions_url_trims_slash() {
        let registry = registry();
        assert_eq!(
            registry.ctx.config.subscriptions_url(),
            "http://127.0.0.1:9/helix/eventsub/subscriptions"
        );
    }

    #[test]
    fn config_from_settings() {
        let settings = RelaySettings::default();
        let config = RegistryConfig::from_settings(&settings);
        assert_eq!(config.session.buffer_capacity, 64);
        assert_eq!(config.session.high_water_mark, 48);
        assert_eq!(config.session.seen_id_horizon.as_secs(), 600);
        assert_eq!(config.helix_base_url, "https://api.twitch.tv/helix");
    }

    #[test]
    fn account_names_are_lowercased_and_unique() {
        let dir = TempDir::new().unwrap();
        let mut registry = registry();
        assert!(registry.add_account("Main", credentials(&dir)));
        assert!(!registry.add_account("MAIN", credentials(&dir)));
        assert!(!registry.add_account("  ", credentials(&dir)));
        assert_eq!(registry.account_names(), vec!["main".to_string()]);
        assert!(registry.credentials("main").is_some());
        assert!(registry.credentials("Main").is_some());
        assert!(registry.subscriptions("main").is_empty());
        assert!(registry.session_id("main").is_none());
    }

    #[tokio::test]
    async fn unknown_account_rejected() {
        let registry = registry();
        let record = SubscriptionRecord::new("channel.follow", Default::default());
        let err = registry
            .ensure_subscription("nobody", record)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::UnknownAccount(_)));
        assert!(matches!(
            registry.snapshot("nobody").await,
            Err(RegistryError::UnknownAccount(_))
        ));
    }
}
