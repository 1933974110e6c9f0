use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

// ─── Notification Kind & Status ───────────────────────────────────

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum NotificationKind {
    #[default]
    Confirmation,
    Choice,
    Info,
    Input,
}

impl NotificationKind {
    pub const ALL: [Self; 4] = [Self::Confirmation, Self::Choice, Self::Info, Self::Input];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Confirmation => "confirmation",
            Self::Choice => "choice",
            Self::Info => "info",
            Self::Input => "input",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationKind {
    type Err = ToolgateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "confirmation" => Ok(Self::Confirmation),
            "choice" => Ok(Self::Choice),
            "info" => Ok(Self::Info),
            "input" => Ok(Self::Input),
            _ => Err(ToolgateError::InvalidKind(s.to_owned())),
        }
    }
}

/// Lifecycle status of a notification.
///
/// Transitions are forward-only: `pending → delivered → {completed |
/// failed | expired}`. `burst_pending` is taken instead of `pending` when
/// the notification joins an open burst window; `duplicate` never enters
/// the live table.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum NotificationStatus {
    #[default]
    Pending,
    Duplicate,
    BurstPending,
    Delivered,
    Completed,
    Failed,
    Expired,
}

impl NotificationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Duplicate => "duplicate",
            Self::BurstPending => "burst_pending",
            Self::Delivered => "delivered",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Expired => "expired",
        }
    }

    /// Terminal statuses accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Expired)
    }

    /// Whether a user resolution or dismissal may still act on this status.
    pub fn is_resolvable(self) -> bool {
        matches!(self, Self::Pending | Self::BurstPending | Self::Delivered)
    }
}

impl fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Actions ──────────────────────────────────────────────────────

/// A button the display layer renders on a confirmation notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub hotkey: Option<String>,
}

impl NotificationAction {
    pub fn new(id: &str, label: &str) -> Self {
        Self {
            id: id.to_owned(),
            label: label.to_owned(),
            hotkey: None,
        }
    }
}

// ─── Invocation & Completion ──────────────────────────────────────

/// A single tool invocation observed in the event log. Immutable once
/// created; referenced by its globally unique id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub parameters: serde_json::Value,
    pub observed_at: DateTime<Utc>,
}

/// Completion record for a previously observed invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCompletion {
    pub invocation_id: String,
    pub is_error: bool,
    pub observed_at: DateTime<Utc>,
}

// ─── Correlation ──────────────────────────────────────────────────

/// Links an invocation to its session and notification lifecycle flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationRecord {
    pub invocation_id: String,
    pub name: String,
    pub session_id: String,
    pub notification_sent: bool,
    pub resolved: bool,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

// ─── Notification State ───────────────────────────────────────────

/// Live notification entry owned by the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationState {
    pub correlation_id: String,
    pub title: String,
    pub body: String,
    pub kind: NotificationKind,
    pub actions: Vec<NotificationAction>,
    pub status: NotificationStatus,
    pub dedup_key: String,
    pub source: String,
    pub session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub intent: Option<String>,
    pub ttl_seconds: u64,
    /// Burst group id (correlation id of the member that opened the window).
    pub burst_group: Option<String>,
}

// ─── Session ──────────────────────────────────────────────────────

/// Pending-invocation bookkeeping inside a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingInvocation {
    pub name: String,
    pub observed_at: DateTime<Utc>,
}

/// One process run of a watching client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub project_path: String,
    pub cwd: String,
    pub pending_invocations: HashMap<String, PendingInvocation>,
    pub completed_count: u64,
    pub active: bool,
}

// ─── Error ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolgateError {
    InvalidKind(String),
    InvalidIntent(String),
}

impl fmt::Display for ToolgateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidKind(s) => write!(f, "unknown notification kind: {s}"),
            Self::InvalidIntent(s) => write!(f, "unknown intent: {s}"),
        }
    }
}

impl std::error::Error for ToolgateError {}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_serde_roundtrip() {
        for k in NotificationKind::ALL {
            let json = serde_json::to_string(&k).expect("serialize");
            let back: NotificationKind = serde_json::from_str(&json).expect("deserialize");
            assert_eq!(k, back);
        }
    }

    #[test]
    fn kind_display_and_parse() {
        for k in NotificationKind::ALL {
            let s = k.to_string();
            let parsed = s.parse::<NotificationKind>().expect("parse");
            assert_eq!(k, parsed);
        }
    }

    #[test]
    fn status_wire_casing_is_snake_case() {
        let json = serde_json::to_string(&NotificationStatus::BurstPending).expect("serialize");
        assert_eq!(json, "\"burst_pending\"");
    }

    #[test]
    fn status_terminal_partition() {
        use NotificationStatus::*;
        for st in [Completed, Failed, Expired] {
            assert!(st.is_terminal());
            assert!(!st.is_resolvable());
        }
        for st in [Pending, BurstPending, Delivered] {
            assert!(!st.is_terminal());
            assert!(st.is_resolvable());
        }
        assert!(!Duplicate.is_terminal());
        assert!(!Duplicate.is_resolvable());
    }

    #[test]
    fn notification_state_serde_roundtrip() {
        let state = NotificationState {
            correlation_id: "toolu_001".into(),
            title: "Claude Code - Write".into(),
            body: "Create: src/main.rs".into(),
            kind: NotificationKind::Confirmation,
            actions: vec![
                NotificationAction::new("accept", "Accept"),
                NotificationAction::new("reject", "Reject"),
            ],
            status: NotificationStatus::Pending,
            dedup_key: "claude code - write|create: src/main.rs|watcher".into(),
            source: "watcher".into(),
            session_id: Some("sess-1".into()),
            created_at: Utc::now(),
            executed_at: None,
            intent: None,
            ttl_seconds: 120,
            burst_group: None,
        };
        let json = serde_json::to_string(&state).expect("serialize");
        let back: NotificationState = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(state, back);
    }

    #[test]
    fn error_display() {
        let err = ToolgateError::InvalidKind("sparkle".into());
        assert!(err.to_string().contains("sparkle"));
    }
}
