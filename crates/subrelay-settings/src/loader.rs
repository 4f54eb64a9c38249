//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`RelaySettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply `SUBRELAY_*` environment variable overrides
//! 4. Check cross-field constraints
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::{ClientIdSetting, RelaySettings};

/// Resolve the default settings path (`~/.subrelay/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".subrelay").join("settings.json")
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON or failed constraints are
/// errors.
pub fn load_settings_from_path(path: &Path) -> Result<RelaySettings> {
    let defaults = serde_json::to_value(RelaySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: RelaySettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are logged and ignored (fall back to file/default).
pub fn apply_env_overrides(settings: &mut RelaySettings) {
    // ── Event stream ────────────────────────────────────────────────
    if let Some(v) = read_env_string("SUBRELAY_EVENTSUB_URL") {
        settings.eventsub.url = v;
    }
    if let Some(v) = read_env_usize("SUBRELAY_BUFFER_CAPACITY", 1, 65_536) {
        settings.eventsub.buffer_capacity = v;
    }
    if let Some(v) = read_env_usize("SUBRELAY_HIGH_WATER_MARK", 1, 65_536) {
        settings.eventsub.high_water_mark = v;
    }
    if let Some(v) = read_env_u64("SUBRELAY_SEEN_ID_HORIZON_SECS", 1, 86_400) {
        settings.eventsub.seen_id_horizon_secs = v;
    }

    // ── API ─────────────────────────────────────────────────────────
    if let Some(v) = read_env_string("SUBRELAY_ID_BASE_URL") {
        settings.api.id_base_url = v;
    }
    if let Some(v) = read_env_string("SUBRELAY_HELIX_BASE_URL") {
        settings.api.helix_base_url = v;
    }
    if let Some(v) = read_env_string("SUBRELAY_CLIENT_ID") {
        settings.api.client_id = ClientIdSetting::Literal(v);
    }

    // ── Validation / retry ──────────────────────────────────────────
    if let Some(v) = read_env_u64("SUBRELAY_VALIDATION_INTERVAL_SECS", 1, 86_400) {
        settings.validation.interval_secs = v;
    }
    if let Some(v) =
        read_env_u64("SUBRELAY_MAX_RETRIES", 0, 10).and_then(|v| u32::try_from(v).ok())
    {
        settings.retry.max_retries = v;
    }

    // ── Misc ────────────────────────────────────────────────────────
    if let Some(v) = read_env_string("SUBRELAY_SECRETS_PATH") {
        settings.secrets_path = v;
    }
    if let Some(v) = read_env_string("SUBRELAY_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_bool("SUBRELAY_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
