use serde::{Deserialize, Serialize};

/// Default event-stream URL; asks for a keepalive every 10 seconds.
pub const DEFAULT_EVENTSUB_URL: &str =
    "wss://eventsub.wss.twitch.tv/ws?keepalive_timeout_seconds=10";

/// Event-stream connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventSubSettings {
    /// URL of the first connection; reconnects use the server-supplied URL.
    pub url: String,
    /// Maximum buffered, undelivered events before the session is dropped.
    pub buffer_capacity: usize,
    /// Buffered-event count at which a warning is logged.
    pub high_water_mark: usize,
    /// How long message ids are remembered for duplicate suppression.
    pub seen_id_horizon_secs: u64,
    /// Keepalive interval assumed until the welcome frame says otherwise.
    pub initial_keepalive_secs: u64,
}

impl Default for EventSubSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_EVENTSUB_URL.to_string(),
            buffer_capacity: 64,
            high_water_mark: 48,
            seen_id_horizon_secs: 600,
            initial_keepalive_secs: 10,
        }
    }
}

/// Periodic credential validation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ValidationSettings {
    /// Seconds between successful validations.
    pub interval_secs: u64,
    /// Upper bound of the random delay added to each interval.
    pub jitter_ms: u64,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            interval_secs: 60 * 60,
            jitter_ms: 2000,
        }
    }
}
