//! # subrelay
//!
//! Relay binary: loads settings and credentials, reads control requests as
//! JSON lines on stdin, and writes replies and published events to stdout.
//! Logs go to stderr.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use subrelay_auth::{CredentialStore, FileSecretStore, OAuthClient, OAuthConfig, SecretStore};
use subrelay_server::{
    AccountRegistry, ControlRouter, HostBus, RegistryConfig, ShutdownCoordinator, StdioBus,
};
use subrelay_session::WsConnector;
use subrelay_settings::RelaySettings;
use tokio::task::JoinHandle;

/// EventSub relay.
#[derive(Parser, Debug)]
#[command(name = "subrelay", about = "EventSub relay over a JSON-lines host bus")]
struct Cli {
    /// Settings file (default `~/.subrelay/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log filter directive, overriding the settings file.
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,
}

/// Load every configured account into `registry`, starting its periodic
/// validation. Accounts whose secret cannot be loaded are skipped.
async fn load_accounts(
    settings: &RelaySettings,
    registry: &mut AccountRegistry,
    coordinator: &ShutdownCoordinator,
) -> Result<Vec<JoinHandle<()>>> {
    let client_id = settings
        .api
        .client_id
        .resolve()
        .context("Failed to resolve client id")?;
    let secrets: Arc<dyn SecretStore> =
        Arc::new(FileSecretStore::new(settings.secrets_path.clone()));
    let oauth = OAuthClient::new(OAuthConfig::from_base(
        &settings.api.id_base_url,
        client_id,
        settings.retry.clone(),
    ));

    let interval = Duration::from_secs(settings.validation.interval_secs);
    let jitter = Duration::from_millis(settings.validation.jitter_ms);
    let mut handles = Vec::new();
    for account in settings.normalized_accounts() {
        match CredentialStore::load(&account.secret, Arc::clone(&secrets), oauth.clone()).await {
            Ok(credentials) => {
                handles.push(credentials.spawn_periodic_validation(
                    interval,
                    jitter,
                    coordinator.token(),
                ));
                let _ = registry.add_account(&account.name, credentials);
                tracing::info!(account = %account.name, "account loaded");
            }
            Err(e) => {
                tracing::warn!(account = %account.name, error = %e, "failed to load account, skipping");
            }
        }
    }
    Ok(handles)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let settings_path = args
        .settings
        .clone()
        .unwrap_or_else(subrelay_settings::settings_path);
    let settings = subrelay_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;

    let level = args.log_level.as_deref().unwrap_or(&settings.logging.level);
    subrelay_core::logging::init_subscriber(level, args.json_logs || settings.logging.json);

    let coordinator = ShutdownCoordinator::new();
    let bus: Arc<dyn HostBus> = Arc::new(StdioBus::stdio());
    let mut registry = AccountRegistry::new(
        RegistryConfig::from_settings(&settings),
        Arc::new(WsConnector),
        Arc::clone(&bus),
    );
    let mut handles = load_accounts(&settings, &mut registry, &coordinator).await?;
    if registry.account_names().is_empty() {
        tracing::warn!("no accounts configured, every request will be rejected");
    }
    let registry = Arc::new(registry);

    let router = Arc::new(ControlRouter::new(Arc::clone(&registry)));
    let mut router_task = tokio::spawn(router.run(bus, coordinator.token()));
    tracing::info!(accounts = ?registry.account_names(), "subrelay running");

    let interrupted = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for ctrl-c")?;
            true
        }
        _ = &mut router_task => false,
    };
    if interrupted {
        tracing::info!("Shutting down...");
        handles.push(router_task);
    } else {
        tracing::info!("host bus closed, shutting down");
    }

    coordinator
        .graceful_shutdown(&registry, handles, None)
        .await;
    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn cli_flags() {
        let cli = Cli::parse_from([
            "subrelay",
            "--settings",
            "/tmp/relay.json",
            "--log-level",
            "debug",
            "--json-logs",
        ]);
        assert_eq!(cli.settings, Some(PathBuf::from("/tmp/relay.json")));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert!(cli.json_logs);

        let bare = Cli::parse_from(["subrelay"]);
        assert!(bare.settings.is_none());
        assert!(!bare.json_logs);
    }

    #[tokio::test]
    async fn accounts_without_secrets_are_skipped() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut settings = RelaySettings::default();
        settings.api.client_id = subrelay_settings::ClientIdSetting::Literal("cid".into());
        settings.secrets_path = dir.path().join("secrets.json").display().to_string();
        settings.accounts = vec![subrelay_settings::AccountSettings {
            name: "main".into(),
            secret: "missing".into(),
        }];

        let (bus, _handle) = subrelay_server::ChannelBus::new(1);
        let mut registry = AccountRegistry::new(
            RegistryConfig::from_settings(&settings),
            Arc::new(WsConnector),
            Arc::new(bus),
        );
        let coordinator = ShutdownCoordinator::new();
        let handles = load_accounts(&settings, &mut registry, &coordinator)
            .await
            .unwrap();
        assert!(handles.is_empty());
        assert!(registry.account_names().is_empty());
    }
}
