//! Keepalive deadlines.
//!
//! Every inbound frame re-arms two deadlines measured from its arrival:
//! a soft one at `interval + 100ms` that only logs, and a hard one at
//! `2 × interval + 50ms` after which the connection is presumed dead.

use std::time::Duration;

use tokio::time::Instant;

/// Slack added to the soft deadline.
pub const WARN_GRACE: Duration = Duration::from_millis(100);
/// Slack added to the hard deadline.
pub const KILL_GRACE: Duration = Duration::from_millis(50);

/// Shortest keepalive interval the event stream negotiates.
pub const MIN_KEEPALIVE: Duration = Duration::from_secs(10);
/// Longest keepalive interval the event stream negotiates.
pub const MAX_KEEPALIVE: Duration = Duration::from_secs(600);

/// Bring an advertised or configured interval into the negotiable range.
pub fn clamp_keepalive(interval: Duration) -> Duration {
    interval.clamp(MIN_KEEPALIVE, MAX_KEEPALIVE)
}

/// The pair of deadlines armed by the last inbound frame.
#[derive(Debug, Clone, Copy)]
pub struct Deadlines {
    /// Soft deadline.
    pub warn_at: Instant,
    /// Hard deadline.
    pub kill_at: Instant,
    /// Whether the soft deadline already fired since the last re-arm.
    pub warned: bool,
}

impl Deadlines {
    /// Arm both deadlines from `now`. `interval` is clamped first.
    pub fn arm(interval: Duration, now: Instant) -> Self {
        let interval = clamp_keepalive(interval);
        let warn_after = interval.saturating_add(WARN_GRACE);
        let kill_after = interval.saturating_mul(2).saturating_add(KILL_GRACE);
        Self {
            warn_at: offset(now, warn_after),
            kill_at: offset(now, kill_after),
            warned: false,
        }
    }
}

/// `now + after`, falling back to the longest representable window.
fn offset(now: Instant, after: Duration) -> Instant {
    now.checked_add(after)
        .or_else(|| now.checked_add(MAX_KEEPALIVE))
        .unwrap_or(now)
}
