//! Locating project transcript directories under the Claude projects root.
//!
//! Project dirs are named after the encoded project path. The watcher
//! matches them by case-insensitive substring and always follows the most
//! recently modified `.jsonl` file in the chosen directory.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// List project directory names under the projects root, sorted.
pub fn list_projects(root: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(root) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .flatten()
        .filter(|e| e.path().is_dir())
        .filter_map(|e| e.file_name().into_string().ok())
        .collect();
    names.sort();
    names
}

/// Find a project directory whose name contains `query`
/// (case-insensitive). Ties resolve to the lexicographically first match.
pub fn find_project_dir(root: &Path, query: &str) -> Option<PathBuf> {
    let needle = query.to_ascii_lowercase();
    list_projects(root)
        .into_iter()
        .find(|name| name.to_ascii_lowercase().contains(&needle))
        .map(|name| root.join(name))
}

/// The most recently modified `.jsonl` file in a project directory, if any.
pub fn active_transcript(project_dir: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(project_dir).ok()?;
    let mut newest: Option<(SystemTime, PathBuf)> = None;

    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
            continue;
        }
        let Ok(meta) = entry.metadata() else { continue };
        let Ok(modified) = meta.modified() else { continue };
        match &newest {
            Some((best, _)) if *best >= modified => {}
            _ => newest = Some((modified, path)),
        }
    }

    newest.map(|(_, path)| path)
}

// ─── Tests ──────────────────────────────────────────────────────────
