//! HTTP wire contract: request and response bodies exchanged between the
//! watching client, remote resolvers, and the broker process.

use crate::types::{NotificationAction, NotificationKind, NotificationState, NotificationStatus};
use serde::{Deserialize, Serialize};

fn default_timeout_seconds() -> u64 {
    120
}

fn default_source() -> String {
    "external".to_owned()
}

/// Body of `POST /api/notification`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateNotificationRequest {
    pub correlation_id: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(rename = "type", default)]
    pub kind: NotificationKind,
    #[serde(default)]
    pub actions: Vec<NotificationAction>,
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Session of the watching client, used for burst grouping.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Tool name backing the notification, kept in the session's pending
    /// invocation bookkeeping.
    #[serde(default)]
    pub tool: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateNotificationResponse {
    pub success: bool,
    pub correlation_id: String,
    pub message: String,
    pub duplicate: bool,
}

/// Body of `POST /api/intent` (and the `/api/accept`, `/api/reject`
/// shortcuts, which fill in `intent`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentRequest {
    pub correlation_id: String,
    #[serde(default)]
    pub intent: String,
    #[serde(default)]
    pub hotkey: Option<String>,
    #[serde(default = "default_source")]
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentResponse {
    pub success: bool,
    pub correlation_id: String,
    pub intent: String,
    pub status: Option<NotificationStatus>,
}

/// Body of `GET /api/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    pub notifications_count: usize,
    pub pending_count: usize,
    pub uptime_seconds: u64,
}

/// Body of `GET /api/notifications`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationListResponse {
    pub notifications: Vec<NotificationState>,
}

/// Body of `GET /health/deep`: per-component counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeepHealthResponse {
    pub status: String,
    pub live_notifications: usize,
    pub dedup_entries: usize,
    pub burst_groups: usize,
    pub sessions: usize,
    pub rate_limited_clients: usize,
}

/// Body of `GET /api/metrics`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsResponse {
    pub request_count: usize,
    pub median_ms: Option<u64>,
    pub p95_ms: Option<u64>,
    pub min_ms: Option<u64>,
    pub max_ms: Option<u64>,
}
