//! Extraction of tool invocations and completions from JSONL transcript lines.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use toolgate_core::types::{ToolCompletion, ToolInvocation};

// ─── Line Model ─────────────────────────────────────────────────────

/// Raw shape of one transcript line. Fields the pipeline does not use are
/// left undeclared and ignored by serde.
#[derive(Debug, Clone, Deserialize)]
struct RawLine {
    #[serde(rename = "type")]
    line_type: String,
    message: Option<RawMessage>,
    timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
    cwd: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawMessage {
    /// Either a plain string (user text) or an array of content blocks.
    content: Option<serde_json::Value>,
}

/// Discriminant of a transcript record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Assistant,
    User,
    System,
}

/// Content block inside a transcript message. Block types outside this
/// enum are ignored during decoding.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        is_error: bool,
    },
}

/// Parsed transcript record with its content blocks.
#[derive(Debug, Clone)]
pub struct TranscriptRecord {
    pub kind: RecordKind,
    pub blocks: Vec<ContentBlock>,
    pub timestamp: Option<DateTime<Utc>>,
    pub session_id: Option<String>,
    pub cwd: Option<String>,
}

// ─── Parsing ────────────────────────────────────────────────────────

/// Parse one raw line. Returns `None` for blank, malformed, or
/// unrecognized-type lines; parsing is never fatal and depends only on
/// the line's bytes, so re-reading the same bytes yields the same record.
pub fn parse_line(line: &str) -> Option<TranscriptRecord> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    let raw: RawLine = match serde_json::from_str(trimmed) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::debug!(error = %e, "skipping malformed transcript line");
            return None;
        }
    };

    let kind = match raw.line_type.as_str() {
        "assistant" => RecordKind::Assistant,
        "user" => RecordKind::User,
        "system" => RecordKind::System,
        _ => return None,
    };

    Some(TranscriptRecord {
        kind,
        blocks: decode_blocks(raw.message.as_ref().and_then(|m| m.content.as_ref())),
        timestamp: raw.timestamp,
        session_id: raw.session_id,
        cwd: raw.cwd,
    })
}

/// Decode known content blocks from the message content, skipping
/// anything that is not a tagged block of a known type.
fn decode_blocks(content: Option<&serde_json::Value>) -> Vec<ContentBlock> {
    let Some(serde_json::Value::Array(items)) = content else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| serde_json::from_value(item.clone()).ok())
        .collect()
}

/// Extract invocation records from an `assistant` record. Other record
/// kinds yield nothing.
pub fn invocations(record: &TranscriptRecord, fallback_now: DateTime<Utc>) -> Vec<ToolInvocation> {
    if record.kind != RecordKind::Assistant {
        return Vec::new();
    }
    let observed_at = record.timestamp.unwrap_or(fallback_now);
    record
        .blocks
        .iter()
        .filter_map(|block| match block {
            ContentBlock::ToolUse { id, name, input } => Some(ToolInvocation {
                id: id.clone(),
                name: name.clone(),
                parameters: input.clone(),
                observed_at,
            }),
            ContentBlock::ToolResult { .. } => None,
        })
        .collect()
}

/// Extract completion records from a `user` record. Other record kinds
/// yield nothing.
pub fn completions(record: &TranscriptRecord, fallback_now: DateTime<Utc>) -> Vec<ToolCompletion> {
    if record.kind != RecordKind::User {
        return Vec::new();
    }
    let observed_at = record.timestamp.unwrap_or(fallback_now);
    record
        .blocks
        .iter()
        .filter_map(|block| match block {
            ContentBlock::ToolResult {
                tool_use_id,
                is_error,
            } => Some(ToolCompletion {
                invocation_id: tool_use_id.clone(),
                is_error: *is_error,
                observed_at,
            }),
            ContentBlock::ToolUse { .. } => None,
        })
        .collect()
}

// ─── Tests ──────────────────────────────────────────────────────────
