//! Per-client sliding-window admission control.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::warn;

/// Quota and cool-off settings.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Admissions allowed per window.
    pub per_minute: u32,
    /// Sliding window length.
    pub window: Duration,
    /// Rejects within `reject_horizon` that trigger a block.
    pub reject_threshold: u32,
    pub reject_horizon: Duration,
    /// How long a tripped client stays blocked.
    pub block_duration: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_minute: 60,
            window: Duration::from_secs(60),
            reject_threshold: 10,
            reject_horizon: Duration::from_secs(60),
            block_duration: Duration::from_secs(60),
        }
    }
}

/// Outcome of an admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    /// Over quota for the current window.
    Limited,
    /// In cool-off after repeated rejects.
    Blocked,
}

#[derive(Debug, Default)]
struct ClientWindow {
    admissions: VecDeque<Instant>,
    rejects: VecDeque<Instant>,
    blocked_until: Option<Instant>,
}

impl ClientWindow {
    fn drop_older_than(queue: &mut VecDeque<Instant>, cutoff: Instant) {
        while queue.front().is_some_and(|t| *t < cutoff) {
            queue.pop_front();
        }
    }

    fn last_seen(&self) -> Option<Instant> {
        let a = self.admissions.back().copied();
        let r = self.rejects.back().copied();
        match (a, r) {
            (Some(a), Some(r)) => Some(a.max(r)),
            (Some(a), None) => Some(a),
            (None, Some(r)) => Some(r),
            (None, None) => self.blocked_until,
        }
    }
}

/// Sliding-window-log rate limiter. Disjoint clients never contend: each
/// client id maps to its own window state.
pub struct RateLimiter {
    config: RateLimitConfig,
    clients: DashMap<String, ClientWindow>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            clients: DashMap::new(),
        }
    }

    /// Attempt to admit one request for `client_id`.
    pub fn check(&self, client_id: &str) -> RateLimitDecision {
        self.check_at(client_id, Instant::now())
    }

    /// Admission with an explicit clock, for deterministic tests.
    pub fn check_at(&self, client_id: &str, now: Instant) -> RateLimitDecision {
        if self.config.per_minute == 0 {
            return RateLimitDecision::Allowed;
        }

        let mut entry = self.clients.entry(client_id.to_string()).or_default();

        if let Some(until) = entry.blocked_until {
            if now < until {
                return RateLimitDecision::Blocked;
            }
            entry.blocked_until = None;
            entry.rejects.clear();
        }

        let window_cutoff = now.checked_sub(self.config.window).unwrap_or(now);
        ClientWindow::drop_older_than(&mut entry.admissions, window_cutoff);

        if entry.admissions.len() >= self.config.per_minute as usize {
            let horizon_cutoff = now.checked_sub(self.config.reject_horizon).unwrap_or(now);
            ClientWindow::drop_older_than(&mut entry.rejects, horizon_cutoff);
            entry.rejects.push_back(now);

            if entry.rejects.len() >= self.config.reject_threshold as usize {
                entry.blocked_until = Some(now + self.config.block_duration);
                warn!(
                    "Client {} blocked for {:?} after {} rejects",
                    client_id,
                    self.config.block_duration,
                    entry.rejects.len()
                );
                return RateLimitDecision::Blocked;
            }
            return RateLimitDecision::Limited;
        }

        entry.admissions.push_back(now);
        RateLimitDecision::Allowed
    }

    /// Drop window state for clients idle longer than `max_idle`.
    pub fn prune_idle(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let stale: Vec<String> = self
            .clients
            .iter()
            .filter_map(|entry| {
                let idle = entry
                    .value()
                    .last_seen()
                    .map(|t| now.duration_since(t) >= max_idle)
                    .unwrap_or(true);
                idle.then(|| entry.key().clone())
            })
            .collect();

        let mut removed = 0;
        for key in stale {
            if self.clients.remove(&key).is_some() {
                removed += 1;
            }
        }
        removed
    }

    /// Number of clients currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.clients.len()
    }
}
