//! Retry configuration and backoff calculation.
//!
//! Sync building blocks for the async helper in [`crate::http`]:
//!
//! - [`RetryConfig`]: retry parameters (max retries, backoff, jitter)
//! - [`calculate_backoff_delay_with_random`]: exponential backoff with jitter
//! - [`parse_retry_after_header`]: parse a `Retry-After` HTTP header
//! - [`parse_ratelimit_reset_header`]: parse an epoch-seconds reset header

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Default maximum retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 2;
/// Default base delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;
/// Default maximum delay in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
/// Default jitter factor (0.0–1.0).
pub const DEFAULT_JITTER_FACTOR: f64 = 0.2;

/// Configuration for retrying rate-limited requests.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first (default: 2).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay for exponential backoff in ms (default: 1000).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Maximum delay between retries in ms (default: 30000).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Jitter factor 0.0–1.0 (default: 0.2).
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}
fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}
fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}
fn default_jitter_factor() -> f64 {
    DEFAULT_JITTER_FACTOR
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

impl RetryConfig {
    /// A policy that never retries; the first 429 is returned as-is.
    pub fn no_retries() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Backoff delay for a zero-based retry attempt, with fresh randomness.
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        calculate_backoff_delay_with_random(
            attempt,
            self.base_delay_ms,
            self.max_delay_ms,
            self.jitter_factor,
            rand::random::<f64>(),
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Backoff calculation
// ─────────────────────────────────────────────────────────────────────────────

/// Calculate backoff delay with explicit randomness.
///
/// Formula: `min(max_delay, base_delay * 2^attempt) * (1 + (2r - 1) * jitter)`.
/// `random` should be a value in `[0.0, 1.0)` from a PRNG.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn calculate_backoff_delay_with_random(
    attempt: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_factor: f64,
    random: f64,
) -> u64 {
    let exponential = base_delay_ms.saturating_mul(1u64 << attempt.min(31));
    let capped = exponential.min(max_delay_ms);

    // Maps random [0,1) to [-jitter, +jitter]
    let jitter = 1.0 + (random * 2.0 - 1.0) * jitter_factor;
    let with_jitter = (capped as f64) * jitter;

    with_jitter.round().max(0.0) as u64
}

// ─────────────────────────────────────────────────────────────────────────────
// Header parsing
// ─────────────────────────────────────────────────────────────────────────────

/// Parse a `Retry-After` HTTP header value.
///
/// The value can be either a number of seconds (`"120"`) or an HTTP-date
/// (`"Thu, 01 Dec 2025 16:00:00 GMT"`). Returns the delay in milliseconds.
#[must_use]
pub fn parse_retry_after_header(value: &str) -> Option<u64> {
    if let Ok(seconds) = value.trim().parse::<u64>() {
        return Some(seconds.saturating_mul(1000));
    }

    let date = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let delay_ms = date
        .signed_duration_since(chrono::Utc::now())
        .num_milliseconds();
    Some(u64::try_from(delay_ms).unwrap_or(0))
}

/// Parse a `Ratelimit-Reset` header (Unix epoch seconds at which the bucket
/// refills) relative to `now_ms`. Returns the delay in milliseconds.
#[must_use]
pub fn parse_ratelimit_reset_header(value: &str, now_ms: i64) -> Option<u64> {
    let reset_secs: i64 = value.trim().parse().ok()?;
    let delay = reset_secs.saturating_mul(1000).saturating_sub(now_ms);
    Some(u64::try_from(delay).unwrap_or(0))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_config_defaults() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.base_delay_ms, 1000);
        assert_eq!(config.max_delay_ms, 30_000);
        assert!((config.jitter_factor - 0.2).abs() < f64::EPSILON);
    }

    #[test]
    fn retry_config_serde_defaults() {
        let config: RetryConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.base_delay_ms, 1000);
    }

    #[test]
    fn retry_config_camel_case() {
        let config: RetryConfig =
            serde_json::from_str(r#"{"maxRetries":7,"baseDelayMs":10}"#).unwrap();
        assert_eq!(config.max_retries, 7);
        assert_eq!(config.base_delay_ms, 10);
    }

    #[test]
    fn no_retries_policy() {
        assert_eq!(RetryConfig::no_retries().max_retries, 0);
    }

    #[test]
    fn backoff_exponential_growth_without_jitter() {
        let d0 = calculate_backoff_delay_with_random(0, 1000, 60_000, 0.0, 0.3);
        let d1 = calculate_backoff_delay_with_random(1, 1000, 60_000, 0.0, 0.3);
        let d2 = calculate_backoff_delay_with_random(2, 1000, 60_000, 0.0, 0.3);
        assert_eq!((d0, d1, d2), (1000, 2000, 4000));
    }

    #[test]
    fn backoff_jitter_bounds() {
        assert_eq!(calculate_backoff_delay_with_random(0, 1000, 60_000, 0.2, 0.0), 800);
        assert_eq!(calculate_backoff_delay_with_random(0, 1000, 60_000, 0.2, 0.5), 1000);
        assert_eq!(calculate_backoff_delay_with_random(0, 1000, 60_000, 0.2, 1.0), 1200);
    }

    #[test]
    fn backoff_caps_at_max_and_survives_large_attempts() {
        assert_eq!(
            calculate_backoff_delay_with_random(100, 1000, 30_000, 0.0, 0.5),
            30_000
        );
    }

    #[test]
    fn backoff_ms_stays_within_jitter() {
        let config = RetryConfig::default();
        for _ in 0..50 {
            let d = config.backoff_ms(1);
            assert!((1600..=2400).contains(&d), "delay {d} out of range");
        }
    }

    #[test]
    fn parse_retry_after_seconds() {
        assert_eq!(parse_retry_after_header("120"), Some(120_000));
        assert_eq!(parse_retry_after_header(" 1 "), Some(1000));
    }

    #[test]
    fn parse_retry_after_huge_value_saturates() {
        assert_eq!(
            parse_retry_after_header(&u64::MAX.to_string()),
            Some(u64::MAX)
        );
    }

    #[test]
    fn parse_retry_after_invalid() {
        assert_eq!(parse_retry_after_header("soon"), None);
        assert_eq!(parse_retry_after_header(""), None);
    }

    #[test]
    fn parse_retry_after_past_date_is_zero() {
        use chrono::{TimeZone, Utc};
        let past = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap().to_rfc2822();
        assert_eq!(parse_retry_after_header(&past), Some(0));
    }

    #[test]
    fn parse_ratelimit_reset_relative_to_now() {
        assert_eq!(parse_ratelimit_reset_header("105", 100_000), Some(5000));
        assert_eq!(parse_ratelimit_reset_header("90", 100_000), Some(0));
        assert_eq!(parse_ratelimit_reset_header("x", 100_000), None);
    }
}
