//! Millisecond wall-clock helpers for credential expiry bookkeeping.

/// Current Unix time in milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Absolute expiry (ms since epoch) for a token that lives `expires_in_secs`.
pub fn calculate_expires_at(expires_in_secs: i64) -> i64 {
    now_ms() + expires_in_secs.saturating_mul(1000)
}

/// Render a millisecond timestamp as RFC 3339.
pub fn ms_to_rfc3339(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .unwrap_or_default()
        .to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
