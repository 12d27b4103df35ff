//! Per-client sliding-window rate limiter.
//!
//! Each client identity maps to a deque of request timestamps. On every
//! check, timestamps older than the window are dropped from that client's
//! deque before the new request is counted; there is no background sweep.
//! The map is capped at `max_clients` identities: when full, idle clients are
//! evicted first, then the least recently seen one.
//!
//! State lives in process memory only. It resets on restart and is not
//! shared between instances behind a load balancer.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::RateLimitConfig;

pub struct SlidingWindowLimiter {
    limit: usize,
    window: Duration,
    max_clients: usize,
    clients: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl SlidingWindowLimiter {
    pub fn new(limit: usize, window: Duration, max_clients: usize) -> Self {
        Self {
            limit,
            window,
            max_clients: max_clients.max(1),
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(
            config.requests_per_window,
            Duration::from_secs(config.window_secs),
            config.max_clients,
        )
    }

    /// Record a request from `client` now. Returns `true` if it is allowed.
    pub fn check(&self, client: &str) -> bool {
        self.check_at(client, Instant::now())
    }

    /// Record a request from `client` at `now`. Returns `true` if it is allowed.
    ///
    /// Rejected requests are counted too, so a client that keeps hammering
    /// stays limited until it backs off for a full window.
    pub fn check_at(&self, client: &str, now: Instant) -> bool {
        let mut clients = self
            .clients
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if !clients.contains_key(client) && clients.len() >= self.max_clients {
            evict(&mut clients, now, self.window);
        }

        let window = self.window;
        let entries = clients.entry(client.to_string()).or_default();
        while let Some(&oldest) = entries.front() {
            if now.saturating_duration_since(oldest) >= window {
                entries.pop_front();
            } else {
                break;
            }
        }
        entries.push_back(now);
        let allowed = entries.len() <= self.limit;

        // Only the newest `limit + 1` timestamps can affect a decision.
        while entries.len() > self.limit + 1 {
            entries.pop_front();
        }

        allowed
    }

    /// Number of tracked client identities.
    pub fn tracked_clients(&self) -> usize {
        self.clients
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

/// Drop clients with no request inside the window; if none qualify, drop the
/// client whose latest request is oldest.
fn evict(clients: &mut HashMap<String, VecDeque<Instant>>, now: Instant, window: Duration) {
    let before = clients.len();
    clients.retain(|_, entries| {
        entries
            .back()
            .is_some_and(|last| now.saturating_duration_since(*last) < window)
    });
    if clients.len() < before {
        return;
    }

    let stalest = clients
        .iter()
        .min_by_key(|(_, entries)| entries.back().copied())
        .map(|(key, _)| key.clone());
    if let Some(key) = stalest {
        clients.remove(&key);
    }
}
