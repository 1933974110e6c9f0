//! Notification broker: dedup, burst grouping, lifecycle transitions,
//! TTL expiry, and capacity eviction.
//!
//! Dedup is evaluated before burst grouping; the two windows are
//! independent (dedup keys on content across all sessions, bursts key on
//! session identity). Status transitions are forward-only.

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::collections::HashMap;
use toolgate_core::types::{NotificationState, NotificationStatus};
use toolgate_core::wire::CreateNotificationRequest;
use tracing::debug;

// ─── Configuration ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Identical-content requests within this window collapse into one.
    pub dedup_window: TimeDelta,
    /// Same-session requests within this window join one burst group.
    pub burst_window: TimeDelta,
    /// Cap on both the live table and the dedup cache.
    pub max_entries: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            dedup_window: TimeDelta::seconds(10),
            burst_window: TimeDelta::seconds(5),
            max_entries: 100,
        }
    }
}

// ─── Outcomes & Events ──────────────────────────────────────────────

/// Result of a create call.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateOutcome {
    pub correlation_id: String,
    /// True when the request was coalesced (content dedup or an id that
    /// already exists). No new live entry was added.
    pub duplicate: bool,
    /// The inserted state, absent for duplicates.
    pub state: Option<NotificationState>,
}

/// Result of a resolve call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveOutcome {
    Resolved { status: NotificationStatus },
    /// The notification already reached a terminal status; racing callers
    /// treat this as completion.
    AlreadyTerminal { status: NotificationStatus },
    NotFound,
}

/// Result of a dismiss call. Every variant is a success for callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DismissOutcome {
    Dismissed { status: NotificationStatus },
    AlreadyTerminal { status: NotificationStatus },
    Unknown,
}

/// Broker-state change delivered to the display layer over a queued
/// hand-off, never via direct access to the broker's maps.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BrokerEvent {
    Created { state: NotificationState },
    StatusChanged {
        correlation_id: String,
        status: NotificationStatus,
    },
}

// ─── Internal ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct DedupEntry {
    last_seen_at: DateTime<Utc>,
    correlation_id: String,
}

#[derive(Debug, Clone)]
struct BurstState {
    /// Correlation id of the member that opened the window.
    group_id: String,
    last_arrival: DateTime<Utc>,
    members: Vec<String>,
}

/// Content fingerprint used for deduplication: title, body, and source,
/// trimmed and case-folded.
pub fn dedup_key(title: &str, body: &str, source: &str) -> String {
    format!(
        "{}|{}|{}",
        title.trim().to_lowercase(),
        body.trim().to_lowercase(),
        source.trim().to_lowercase()
    )
}

// ─── NotificationBroker ─────────────────────────────────────────────

#[derive(Debug)]
pub struct NotificationBroker {
    config: BrokerConfig,
    live: HashMap<String, NotificationState>,
    dedup: HashMap<String, DedupEntry>,
    bursts: HashMap<String, BurstState>,
}

impl NotificationBroker {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            live: HashMap::new(),
            dedup: HashMap::new(),
            bursts: HashMap::new(),
        }
    }

    /// Create a notification from a wire request.
    ///
    /// Order of checks: live-id coalescing, content dedup, burst grouping.
    /// A duplicate returns success with no new live entry.
    pub fn create(&mut self, req: &CreateNotificationRequest, now: DateTime<Utc>) -> CreateOutcome {
        // An id already known to the broker is never overwritten, and a
        // resolved id never re-enters pending.
        if self.live.contains_key(&req.correlation_id) {
            debug!(correlation_id = %req.correlation_id, "create coalesced: id already known");
            return CreateOutcome {
                correlation_id: req.correlation_id.clone(),
                duplicate: true,
                state: None,
            };
        }

        let key = dedup_key(&req.title, &req.body, &req.source);
        self.prune_dedup(now);
        if let Some(entry) = self.dedup.get(&key) {
            if now - entry.last_seen_at <= self.config.dedup_window {
                debug!(
                    correlation_id = %req.correlation_id,
                    matched = %entry.correlation_id,
                    "create deduplicated within window"
                );
                // Answer with the live id so a caller that retried under
                // a fresh id converges on the original notification.
                return CreateOutcome {
                    correlation_id: entry.correlation_id.clone(),
                    duplicate: true,
                    state: None,
                };
            }
        }

        // Burst grouping is keyed by session, falling back to source for
        // callers that carry no session id.
        let burst_key = req
            .session_id
            .clone()
            .unwrap_or_else(|| req.source.clone());
        let (status, burst_group) = match self.bursts.get_mut(&burst_key) {
            Some(burst) if now - burst.last_arrival <= self.config.burst_window => {
                burst.last_arrival = now;
                burst.members.push(req.correlation_id.clone());
                (
                    NotificationStatus::BurstPending,
                    Some(burst.group_id.clone()),
                )
            }
            _ => {
                self.bursts.insert(
                    burst_key,
                    BurstState {
                        group_id: req.correlation_id.clone(),
                        last_arrival: now,
                        members: vec![req.correlation_id.clone()],
                    },
                );
                (NotificationStatus::Pending, None)
            }
        };

        let state = NotificationState {
            correlation_id: req.correlation_id.clone(),
            title: req.title.clone(),
            body: req.body.clone(),
            kind: req.kind,
            actions: req.actions.clone(),
            status,
            dedup_key: key.clone(),
            source: req.source.clone(),
            session_id: req.session_id.clone(),
            created_at: now,
            executed_at: None,
            intent: None,
            ttl_seconds: req.timeout_seconds,
            burst_group,
        };

        self.live.insert(req.correlation_id.clone(), state.clone());
        self.dedup.insert(
            key,
            DedupEntry {
                last_seen_at: now,
                correlation_id: req.correlation_id.clone(),
            },
        );
        self.enforce_caps();

        CreateOutcome {
            correlation_id: req.correlation_id.clone(),
            duplicate: false,
            state: Some(state),
        }
    }

    /// Mark a pending notification as handed to the display layer.
    pub fn mark_delivered(&mut self, correlation_id: &str) -> bool {
        match self.live.get_mut(correlation_id) {
            Some(state)
                if matches!(
                    state.status,
                    NotificationStatus::Pending | NotificationStatus::BurstPending
                ) =>
            {
                state.status = NotificationStatus::Delivered;
                true
            }
            _ => false,
        }
    }

    /// Record a user resolution. Valid only while the notification is in a
    /// resolvable status; resolving one burst member leaves its siblings
    /// untouched.
    pub fn resolve(
        &mut self,
        correlation_id: &str,
        intent: &str,
        now: DateTime<Utc>,
    ) -> ResolveOutcome {
        let Some(state) = self.live.get_mut(correlation_id) else {
            return ResolveOutcome::NotFound;
        };
        if !state.status.is_resolvable() {
            return ResolveOutcome::AlreadyTerminal {
                status: state.status,
            };
        }
        state.status = NotificationStatus::Completed;
        state.intent = Some(intent.to_owned());
        state.executed_at = Some(now);
        ResolveOutcome::Resolved {
            status: state.status,
        }
    }

    /// Dismiss on completion detection, independent of user action.
    /// Idempotent: terminal and unknown ids are tolerated. An errored
    /// completion marks the notification failed instead of completed.
    pub fn dismiss(
        &mut self,
        correlation_id: &str,
        is_error: bool,
        now: DateTime<Utc>,
    ) -> DismissOutcome {
        let Some(state) = self.live.get_mut(correlation_id) else {
            return DismissOutcome::Unknown;
        };
        if !state.status.is_resolvable() {
            return DismissOutcome::AlreadyTerminal {
                status: state.status,
            };
        }
        state.status = if is_error {
            NotificationStatus::Failed
        } else {
            NotificationStatus::Completed
        };
        state.executed_at = Some(now);
        DismissOutcome::Dismissed {
            status: state.status,
        }
    }

    /// Time-driven sweep: resolvable notifications older than their TTL
    /// transition to expired. Returns the affected ids.
    pub fn expire(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let mut expired = Vec::new();
        for (id, state) in self.live.iter_mut() {
            if state.status.is_resolvable()
                && now - state.created_at > TimeDelta::seconds(state.ttl_seconds as i64)
            {
                state.status = NotificationStatus::Expired;
                expired.push(id.clone());
            }
        }
        expired
    }

    /// Live, still-actionable notifications, oldest first.
    pub fn list(&self) -> Vec<NotificationState> {
        let mut items: Vec<NotificationState> = self
            .live
            .values()
            .filter(|s| s.status.is_resolvable())
            .cloned()
            .collect();
        items.sort_by_key(|s| s.created_at);
        items
    }

    pub fn get(&self, correlation_id: &str) -> Option<&NotificationState> {
        self.live.get(correlation_id)
    }

    /// Count of still-actionable notifications.
    pub fn active_count(&self) -> usize {
        self.live
            .values()
            .filter(|s| s.status.is_resolvable())
            .count()
    }

    /// Total entries in the live table, terminal ones included.
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn dedup_count(&self) -> usize {
        self.dedup.len()
    }

    pub fn burst_count(&self) -> usize {
        self.bursts.len()
    }

    /// Drop dedup entries older than the window and stale burst windows.
    fn prune_dedup(&mut self, now: DateTime<Utc>) {
        let dedup_window = self.config.dedup_window;
        self.dedup
            .retain(|_, e| now - e.last_seen_at <= dedup_window);
        let burst_window = self.config.burst_window;
        self.bursts
            .retain(|_, b| now - b.last_arrival <= burst_window);
    }

    /// Bound both tables. The live table evicts oldest terminal entries
    /// first, falling back to oldest overall to hold the cap.
    fn enforce_caps(&mut self) {
        while self.live.len() > self.config.max_entries {
            let victim = self
                .live
                .values()
                .filter(|s| s.status.is_terminal())
                .min_by_key(|s| s.created_at)
                .or_else(|| self.live.values().min_by_key(|s| s.created_at))
                .map(|s| s.correlation_id.clone());
            match victim {
                Some(id) => {
                    self.live.remove(&id);
                }
                None => break,
            }
        }

        while self.dedup.len() > self.config.max_entries {
            let victim = self
                .dedup
                .iter()
                .min_by_key(|(_, e)| e.last_seen_at)
                .map(|(k, _)| k.clone());
            match victim {
                Some(key) => {
                    self.dedup.remove(&key);
                }
                None => break,
            }
        }
    }
}

impl Default for NotificationBroker {
    fn default() -> Self {
        Self::new(BrokerConfig::default())
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
