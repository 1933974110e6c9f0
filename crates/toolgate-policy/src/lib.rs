//! toolgate-policy: pure auto-approval decision for tool invocations.
//!
//! A fixed set of tool kinds always requires confirmation. `Bash` is
//! further filtered by a safe-prefix whitelist over the command text.

use serde_json::Value;

// ─── Defaults ───────────────────────────────────────────────────────

/// Tool kinds that require human confirmation unless whitelisted.
pub const CONFIRM_TOOLS: [&str; 4] = ["Write", "Edit", "NotebookEdit", "Bash"];

/// Command prefixes auto-approved for the `Bash` tool. Matching is
/// case-insensitive against the trimmed command string.
pub const SAFE_BASH_PREFIXES: [&str; 21] = [
    "git add",
    "git commit",
    "git push",
    "git status",
    "git diff",
    "git log",
    "python ",
    "python3 ",
    "python -m",
    "python3 -m",
    "pip install",
    "pip3 install",
    "dir",
    "wc ",
    "echo ",
    "cat ",
    "ls",
    "pwd",
    "cd ",
    "curl ",
    "mkdir ",
];

// ─── ApprovalPolicy ─────────────────────────────────────────────────

/// Decides whether an invocation needs a human to confirm it.
///
/// The confirm set is fixed; the safe-prefix whitelist is append-only at
/// runtime so operators can tune it without restarting the watcher.
#[derive(Debug, Clone)]
pub struct ApprovalPolicy {
    safe_prefixes: Vec<String>,
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl ApprovalPolicy {
    pub fn new() -> Self {
        Self {
            safe_prefixes: SAFE_BASH_PREFIXES
                .iter()
                .map(|p| p.to_ascii_lowercase())
                .collect(),
        }
    }

    /// Append a safe prefix. Prefixes are never removed.
    pub fn allow_prefix(&mut self, prefix: &str) {
        self.safe_prefixes.push(prefix.to_ascii_lowercase());
    }

    pub fn prefix_count(&self) -> usize {
        self.safe_prefixes.len()
    }

    /// Pure decision: does this invocation require confirmation?
    ///
    /// Tools outside the confirm set are auto-approved. `Bash` commands
    /// matching a safe prefix (trimmed, case-folded) are auto-approved.
    pub fn needs_confirmation(&self, name: &str, parameters: &Value) -> bool {
        if !CONFIRM_TOOLS.contains(&name) {
            return false;
        }

        if name == "Bash" {
            let command = parameters
                .get("command")
                .and_then(Value::as_str)
                .unwrap_or("");
            return !self.is_safe_command(command);
        }

        true
    }

    fn is_safe_command(&self, command: &str) -> bool {
        let normalized = command.trim().to_ascii_lowercase();
        if normalized.is_empty() {
            return false;
        }
        self.safe_prefixes
            .iter()
            .any(|prefix| normalized.starts_with(prefix.as_str()))
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
