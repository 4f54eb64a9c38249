use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Upstream API endpoints and client identity.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiSettings {
    /// Base URL of the identity service (token refresh and validation).
    pub id_base_url: String,
    /// Base URL of the REST API (subscription registration).
    pub helix_base_url: String,
    /// Application client id, literal or read from the environment.
    pub client_id: ClientIdSetting,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            id_base_url: "https://id.twitch.tv".to_string(),
            helix_base_url: "https://api.twitch.tv/helix".to_string(),
            client_id: ClientIdSetting::Env {
                env: "TWITCH_CLIENT_ID".to_string(),
            },
        }
    }
}

/// Where the client id comes from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClientIdSetting {
    /// A literal client id.
    Literal(String),
    /// The name of an environment variable holding the client id.
    Env {
        /// Variable name.
        env: String,
    },
}

impl ClientIdSetting {
    /// Resolve to the concrete client id.
    pub fn resolve(&self) -> Result<String> {
        match self {
            Self::Literal(id) => Ok(id.clone()),
            Self::Env { env } => std::env::var(env)
                .ok()
                .filter(|v| !v.is_empty())
                .ok_or_else(|| SettingsError::MissingClientId(env.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_client_id_resolves() {
        let setting: ClientIdSetting = serde_json::from_str(r#""abc123""#).unwrap();
        assert_eq!(setting.resolve().unwrap(), "abc123");
    }

    #[test]
    fn env_client_id_parses() {
        let setting: ClientIdSetting = serde_json::from_str(r#"{"env": "X_ID"}"#).unwrap();
        assert_eq!(
            setting,
            ClientIdSetting::Env {
                env: "X_ID".into()
            }
        );
    }

    #[test]
    fn env_client_id_missing_is_error() {
        let setting = ClientIdSetting::Env {
            env: "SUBRELAY_TEST_DEFINITELY_UNSET_CLIENT_ID".into(),
        };
        assert!(matches!(
            setting.resolve(),
            Err(SettingsError::MissingClientId(_))
        ));
    }

    #[test]
    fn default_endpoints() {
        let api = ApiSettings::default();
        assert_eq!(api.id_base_url, "https://id.twitch.tv");
        assert!(api.helix_base_url.ends_with("/helix"));
    }
}
