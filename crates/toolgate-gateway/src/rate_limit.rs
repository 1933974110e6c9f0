//! Sliding-window rate limiter keyed by client IP.
//!
//! Window bookkeeping is per-client and trimmed lazily on each check;
//! there is no background sweep. A rejected request mutates no state
//! beyond the trim.

use std::collections::HashMap;
use std::net::IpAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    Limited { retry_after_ms: u64 },
}

#[derive(Debug)]
pub struct RateLimiter {
    /// Maximum requests per client within one window.
    max_requests: u32,
    /// Window length in milliseconds.
    window_ms: u64,
    /// Request timestamps per client, chronological.
    clients: HashMap<IpAddr, Vec<u64>>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window_ms: u64) -> Self {
        Self {
            max_requests,
            window_ms,
            clients: HashMap::new(),
        }
    }

    /// Check one request from `client` at `now_ms`. Allowed requests are
    /// recorded; limited ones are not.
    pub fn check(&mut self, client: IpAddr, now_ms: u64) -> RateDecision {
        let cutoff = now_ms.saturating_sub(self.window_ms);
        let stamps = self.clients.entry(client).or_default();
        stamps.retain(|&ts| ts > cutoff);

        if (stamps.len() as u32) < self.max_requests {
            stamps.push(now_ms);
            RateDecision::Allowed {
                remaining: self.max_requests - stamps.len() as u32,
            }
        } else {
            // Oldest surviving stamp decides when capacity frees up.
            let retry_after_ms = stamps
                .first()
                .map(|&oldest| (oldest + self.window_ms).saturating_sub(now_ms))
                .unwrap_or(self.window_ms);
            RateDecision::Limited { retry_after_ms }
        }
    }

    /// Number of clients with window state.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
