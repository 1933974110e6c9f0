//! Session registry: one record per process run of a watching client,
//! with pending-invocation bookkeeping for reporting and cleanup.

use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use toolgate_core::types::{PendingInvocation, Session};

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<String, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session, or return the existing one untouched. Create calls
    /// carrying a session id open sessions lazily through this path.
    pub fn open(
        &mut self,
        id: &str,
        project_path: &str,
        cwd: &str,
        now: DateTime<Utc>,
    ) -> &Session {
        self.sessions.entry(id.to_owned()).or_insert_with(|| Session {
            id: id.to_owned(),
            started_at: now,
            ended_at: None,
            project_path: project_path.to_owned(),
            cwd: cwd.to_owned(),
            pending_invocations: HashMap::new(),
            completed_count: 0,
            active: true,
        })
    }

    /// Record an invocation awaiting resolution. Opens the session lazily
    /// if the first thing seen from it is an invocation.
    pub fn record_invocation(
        &mut self,
        session_id: &str,
        invocation_id: &str,
        name: &str,
        now: DateTime<Utc>,
    ) {
        self.open(session_id, "", "", now);
        if let Some(session) = self.sessions.get_mut(session_id) {
            session.pending_invocations.insert(
                invocation_id.to_owned(),
                PendingInvocation {
                    name: name.to_owned(),
                    observed_at: now,
                },
            );
        }
    }

    /// Move an invocation from pending to completed. Unknown ids are
    /// no-ops; the registry and broker may observe completions in either
    /// order.
    pub fn record_completion(&mut self, invocation_id: &str) {
        for session in self.sessions.values_mut() {
            if session.pending_invocations.remove(invocation_id).is_some() {
                session.completed_count += 1;
                return;
            }
        }
    }

    /// End a session. Its pending invocations stay visible until cleanup.
    pub fn end(&mut self, id: &str, now: DateTime<Utc>) {
        if let Some(session) = self.sessions.get_mut(id) {
            if session.active {
                session.active = false;
                session.ended_at = Some(now);
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&Session> {
        self.sessions.get(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Pending invocations across active sessions.
    pub fn pending_count(&self) -> usize {
        self.sessions
            .values()
            .filter(|s| s.active)
            .map(|s| s.pending_invocations.len())
            .sum()
    }

    /// The session currently holding an invocation as pending.
    pub fn find_session_by_invocation(&self, invocation_id: &str) -> Option<&Session> {
        self.sessions
            .values()
            .find(|s| s.pending_invocations.contains_key(invocation_id))
    }

    /// Remove ended sessions older than `max_age`.
    pub fn cleanup(&mut self, max_age: TimeDelta, now: DateTime<Utc>) {
        self.sessions.retain(|_, s| {
            s.active || s.ended_at.is_none_or(|ended| now - ended <= max_age)
        });
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
