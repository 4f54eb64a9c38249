//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]`. Each type implements
//! [`Default`] with production values and is marked `#[serde(default)]` so
//! partial JSON fills in the rest.

mod api;
mod eventsub;

pub use api::*;
pub use eventsub::*;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use subrelay_core::RetryConfig;

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "api": { "clientId": { "env": "TWITCH_CLIENT_ID" } },
///   "accounts": [{ "name": "Main", "secret": "twitch-main" }]
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Settings schema version.
    pub version: String,
    /// Application name.
    pub name: String,
    /// Event-stream connection settings.
    pub eventsub: EventSubSettings,
    /// Upstream API endpoints and client identity.
    pub api: ApiSettings,
    /// Retry policy for rate-limited upstream calls.
    pub retry: RetryConfig,
    /// Periodic credential validation.
    pub validation: ValidationSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
    /// Path of the JSON secret store.
    pub secrets_path: String,
    /// Configured accounts, one credential each.
    pub accounts: Vec<AccountSettings>,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            name: "subrelay".to_string(),
            eventsub: EventSubSettings::default(),
            api: ApiSettings::default(),
            retry: RetryConfig::default(),
            validation: ValidationSettings::default(),
            logging: LoggingSettings::default(),
            secrets_path: default_secrets_path(),
            accounts: Vec::new(),
        }
    }
}

impl RelaySettings {
    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let es = &self.eventsub;
        if es.buffer_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "eventsub.bufferCapacity must be at least 1".into(),
            ));
        }
        if es.high_water_mark > es.buffer_capacity {
            return Err(SettingsError::InvalidValue(format!(
                "eventsub.highWaterMark ({}) exceeds bufferCapacity ({})",
                es.high_water_mark, es.buffer_capacity
            )));
        }
        if self.validation.interval_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "validation.intervalSecs must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Accounts with lower-cased names, skipping blank and duplicate entries.
    pub fn normalized_accounts(&self) -> Vec<AccountSettings> {
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(self.accounts.len());
        for account in &self.accounts {
            let name = account.name.trim().to_lowercase();
            if name.is_empty() || account.secret.trim().is_empty() {
                tracing::warn!(name = %account.name, "invalid account configuration, skipping");
                continue;
            }
            if !seen.insert(name.clone()) {
                tracing::warn!(%name, "duplicate account name, skipping");
                continue;
            }
            out.push(AccountSettings {
                name,
                secret: account.secret.clone(),
            });
        }
        out
    }
}

/// One configured account.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AccountSettings {
    /// Account name used by control requests (matched case-insensitively).
    pub name: String,
    /// Reference of the credential inside the secret store.
    pub secret: String,
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of the compact format.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

fn default_secrets_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    format!("{home}/.subrelay/secrets.json")
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
