//! Correlation tracking between tool invocations and their session.
//!
//! The watcher and the broker may race (a completion can arrive before the
//! create call is acknowledged), so operations on unknown ids are silent
//! no-ops rather than errors.

use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use toolgate_core::types::CorrelationRecord;

#[derive(Debug, Default)]
pub struct CorrelationTracker {
    records: HashMap<String, CorrelationRecord>,
}

impl CorrelationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a record for a newly observed invocation. Duplicate ids are
    /// ignored; invocation ids are unique within a run, so a repeat means
    /// the same bytes were read twice.
    pub fn track(&mut self, id: &str, name: &str, session_id: &str, now: DateTime<Utc>) {
        self.records
            .entry(id.to_owned())
            .or_insert_with(|| CorrelationRecord {
                invocation_id: id.to_owned(),
                name: name.to_owned(),
                session_id: session_id.to_owned(),
                notification_sent: false,
                resolved: false,
                created_at: now,
                resolved_at: None,
            });
    }

    /// Flag the record after the broker accepted the create call.
    pub fn mark_notification_sent(&mut self, id: &str) {
        if let Some(record) = self.records.get_mut(id) {
            record.notification_sent = true;
        }
    }

    /// Flag the record as resolved, by user action or completion detection.
    pub fn mark_resolved(&mut self, id: &str, now: DateTime<Utc>) {
        if let Some(record) = self.records.get_mut(id) {
            if !record.resolved {
                record.resolved = true;
                record.resolved_at = Some(now);
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&CorrelationRecord> {
        self.records.get(id)
    }

    /// Records with a notification out but no resolution yet.
    pub fn pending(&self) -> Vec<&CorrelationRecord> {
        self.records
            .values()
            .filter(|r| r.notification_sent && !r.resolved)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Delete resolved records older than `max_age`, bounding memory.
    pub fn cleanup(&mut self, max_age: TimeDelta, now: DateTime<Utc>) {
        self.records.retain(|_, r| {
            !(r.resolved && r.resolved_at.is_some_and(|ts| now - ts > max_age))
        });
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
