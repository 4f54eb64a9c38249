//! Time-bounded set of message ids already delivered.
//!
//! Ids older than the horizon are evicted lazily on insert, so memory stays
//! proportional to traffic within the horizon.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use tokio::time::Instant;

/// Default retention for seen message ids.
pub const DEFAULT_HORIZON: Duration = Duration::from_secs(10 * 60);

/// Message ids seen within the horizon.
#[derive(Debug)]
pub struct SeenIds {
    horizon: Duration,
    ids: HashSet<String>,
    order: VecDeque<(Instant, String)>,
}

impl SeenIds {
    /// Empty window with the given retention.
    pub fn new(horizon: Duration) -> Self {
        Self {
            horizon,
            ids: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    /// Record `id` at `now`. Returns `false` if it was already present.
    pub fn insert(&mut self, id: &str, now: Instant) -> bool {
        self.evict(now);
        if self.ids.contains(id) {
            return false;
        }
        let _ = self.ids.insert(id.to_string());
        self.order.push_back((now, id.to_string()));
        true
    }

    /// Ids currently retained.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether nothing is retained.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    fn evict(&mut self, now: Instant) {
        while let Some((at, _)) = self.order.front() {
            if now.saturating_duration_since(*at) < self.horizon {
                break;
            }
            if let Some((_, id)) = self.order.pop_front() {
                let _ = self.ids.remove(&id);
            }
        }
    }
}

impl Default for SeenIds {
    fn default() -> Self {
        Self::new(DEFAULT_HORIZON)
    }
}
