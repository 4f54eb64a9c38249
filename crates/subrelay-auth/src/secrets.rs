//! Secret persistence.
//!
//! [`SecretStore`] is the seam to whatever keeps credentials between runs.
//! [`FileSecretStore`] reads and writes a JSON file with `0o600` permissions:
//!
//! ```json
//! {
//!   "version": 1,
//!   "secrets": { "twitch-main": { "type": "oauthToken", "value": { ... },
//!                                 "metadata": { "service": "twitch" } } },
//!   "lastUpdated": "2025-01-01T00:00:00Z"
//! }
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::errors::AuthError;
use crate::types::{Credential, StoredSecret};

/// Where credentials are loaded from and persisted to.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Load a secret by reference. `Ok(None)` if it does not exist.
    async fn load(&self, secret_ref: &str) -> Result<Option<StoredSecret>, AuthError>;

    /// Replace the credential stored under `secret_ref`.
    async fn update(&self, secret_ref: &str, credential: &Credential) -> Result<(), AuthError>;
}

/// On-disk schema of the secret file.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretFile {
    /// Schema version (always 1).
    pub version: u32,
    /// Secrets by reference.
    #[serde(default)]
    pub secrets: HashMap<String, StoredSecret>,
    /// ISO 8601 timestamp of last update.
    #[serde(default)]
    pub last_updated: String,
}

impl Default for SecretFile {
    fn default() -> Self {
        Self {
            version: 1,
            secrets: HashMap::new(),
            last_updated: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// JSON-file-backed secret store.
///
/// Read-modify-write cycles are serialized by an internal lock so accounts
/// refreshing at the same moment do not clobber each other.
pub struct FileSecretStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileSecretStore {
    /// Create a store over `path`. The file is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert or replace a secret (used by provisioning and tests).
    pub fn put(&self, secret_ref: &str, secret: StoredSecret) -> Result<(), AuthError> {
        let _guard = self.lock.lock();
        let mut file = read_secret_file(&self.path)?.unwrap_or_default();
        let _ = file.secrets.insert(secret_ref.to_string(), secret);
        write_secret_file(&self.path, &mut file)
    }
}

#[async_trait]
impl SecretStore for FileSecretStore {
    async fn load(&self, secret_ref: &str) -> Result<Option<StoredSecret>, AuthError> {
        let _guard = self.lock.lock();
        Ok(read_secret_file(&self.path)?.and_then(|mut f| f.secrets.remove(secret_ref)))
    }

    async fn update(&self, secret_ref: &str, credential: &Credential) -> Result<(), AuthError> {
        let _guard = self.lock.lock();
        let mut file = read_secret_file(&self.path)?.unwrap_or_default();
        let _ = file
            .secrets
            .insert(secret_ref.to_string(), StoredSecret::oauth(credential.clone()));
        write_secret_file(&self.path, &mut file)?;
        tracing::debug!(secret = secret_ref, "persisted refreshed credential");
        Ok(())
    }
}

/// Read the secret file. `Ok(None)` when it does not exist.
fn read_secret_file(path: &Path) -> Result<Option<SecretFile>, AuthError> {
    let data = match std::fs::read_to_string(path) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let file: SecretFile = serde_json::from_str(&data)?;
    if file.version != 1 {
        return Err(AuthError::Json(format!(
            "unsupported secret file version: {}",
            file.version
        )));
    }
    Ok(Some(file))
}

/// Write the secret file, creating parent directories. Sets `0o600`.
fn write_secret_file(path: &Path, file: &mut SecretFile) -> Result<(), AuthError> {
    file.last_updated = chrono::Utc::now().to_rfc3339();

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(file)?;
    std::fs::write(path, &json)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        let _ = std::fs::set_permissions(path, perms);
    }

    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
