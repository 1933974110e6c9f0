//! Watching client: tails the active transcript, runs the auto-approval
//! policy, and forwards confirmations to the broker over HTTP.
//!
//! Change detection layers a notify watcher over a polling fallback, so
//! a missed filesystem event delays a line by at most one poll interval.
//! Changed files are read only after they have been quiet for the
//! debounce threshold.

use chrono::{DateTime, TimeDelta, Utc};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use toolgate_core::types::{NotificationAction, NotificationKind, ToolInvocation};
use toolgate_core::wire::CreateNotificationRequest;
use toolgate_policy::ApprovalPolicy;
use toolgate_transcript::correlation::CorrelationTracker;
use toolgate_transcript::{discovery, extract, tail::TranscriptTail};
use tracing::{debug, info, warn};

use crate::cli::{WatchOpts, default_projects_dir};
use crate::notify_client::{NotifyClient, RetryPolicy};

const SOURCE: &str = "claude-watch";
const CONFIRM_TTL_SECONDS: u64 = 120;
const INFO_TTL_SECONDS: u64 = 5;
const TRACKER_MAX_AGE: TimeDelta = TimeDelta::minutes(5);
const TRACKER_CLEANUP_EVERY: Duration = Duration::from_secs(60);

// ─── Line processing ────────────────────────────────────────────────

/// Request the watch loop wants delivered to the broker.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Create(CreateNotificationRequest),
    Dismiss {
        correlation_id: String,
        is_error: bool,
    },
}

/// Per-watcher state independent of transport, so line handling is
/// testable without a broker.
pub struct WatchState {
    /// Fallback session id when a record carries none.
    session_id: String,
    policy: ApprovalPolicy,
    tracker: Arc<Mutex<CorrelationTracker>>,
    /// Guards against re-dismissing when a completion line is re-read
    /// after truncation or rotation.
    seen_completions: HashSet<String>,
    verbose: bool,
}

impl WatchState {
    pub fn new(policy: ApprovalPolicy, verbose: bool) -> Self {
        Self {
            session_id: watcher_session_id(),
            policy,
            tracker: Arc::new(Mutex::new(CorrelationTracker::new())),
            seen_completions: HashSet::new(),
            verbose,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn tracker(&self) -> Arc<Mutex<CorrelationTracker>> {
        Arc::clone(&self.tracker)
    }

    /// Turn one transcript line into zero or more outbound requests.
    pub fn process_line(&mut self, line: &str, now: DateTime<Utc>) -> Vec<Outbound> {
        let Some(record) = extract::parse_line(line) else {
            return Vec::new();
        };
        let session_id = record
            .session_id
            .clone()
            .unwrap_or_else(|| self.session_id.clone());

        let mut out = Vec::new();

        for invocation in extract::invocations(&record, now) {
            let needs_confirmation = self
                .policy
                .needs_confirmation(&invocation.name, &invocation.parameters);
            {
                let mut tracker = lock_tracker(&self.tracker);
                tracker.track(&invocation.id, &invocation.name, &session_id, now);
            }
            if needs_confirmation {
                out.push(Outbound::Create(confirmation_request(
                    &invocation,
                    &session_id,
                )));
            } else if self.verbose {
                out.push(Outbound::Create(info_request(&invocation, &session_id)));
            } else {
                debug!(tool = %invocation.name, "auto-approved, no notification");
            }
        }

        for completion in extract::completions(&record, now) {
            if !self.seen_completions.insert(completion.invocation_id.clone()) {
                continue;
            }
            // Dismiss even ids this process never tracked: after a restart
            // the broker may still hold a notification from the previous
            // run, and it tolerates dismissal of ids it never saw.
            lock_tracker(&self.tracker).mark_resolved(&completion.invocation_id, now);
            out.push(Outbound::Dismiss {
                correlation_id: completion.invocation_id.clone(),
                is_error: completion.is_error,
            });
        }

        out
    }
}

fn lock_tracker(
    tracker: &Arc<Mutex<CorrelationTracker>>,
) -> std::sync::MutexGuard<'_, CorrelationTracker> {
    tracker.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Watcher-local session id. Process id plus a nanosecond stamp keeps
/// concurrent watchers distinct.
fn watcher_session_id() -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    format!("watch-{}-{}", std::process::id(), nanos)
}

fn confirmation_request(
    invocation: &ToolInvocation,
    session_id: &str,
) -> CreateNotificationRequest {
    CreateNotificationRequest {
        correlation_id: invocation.id.clone(),
        title: format!("Claude Code - {}", invocation.name),
        body: describe_invocation(&invocation.name, &invocation.parameters),
        kind: NotificationKind::Confirmation,
        actions: vec![
            NotificationAction {
                id: "accept".to_owned(),
                label: "Accept".to_owned(),
                hotkey: Some("y".to_owned()),
            },
            NotificationAction {
                id: "reject".to_owned(),
                label: "Reject".to_owned(),
                hotkey: Some("n".to_owned()),
            },
        ],
        source: SOURCE.to_owned(),
        timeout_seconds: CONFIRM_TTL_SECONDS,
        session_id: Some(session_id.to_owned()),
        tool: Some(invocation.name.clone()),
    }
}

fn info_request(invocation: &ToolInvocation, session_id: &str) -> CreateNotificationRequest {
    CreateNotificationRequest {
        correlation_id: invocation.id.clone(),
        title: format!("Claude Code - {}", invocation.name),
        body: describe_invocation(&invocation.name, &invocation.parameters),
        kind: NotificationKind::Info,
        actions: Vec::new(),
        source: SOURCE.to_owned(),
        timeout_seconds: INFO_TTL_SECONDS,
        session_id: Some(session_id.to_owned()),
        tool: Some(invocation.name.clone()),
    }
}

/// One-line human summary of a tool invocation for the notification body.
pub fn describe_invocation(name: &str, parameters: &serde_json::Value) -> String {
    let str_param = |key: &str| parameters.get(key).and_then(|v| v.as_str());
    match name {
        "Write" => match str_param("file_path") {
            Some(path) => format!("Create: {path}"),
            None => "Create file".to_owned(),
        },
        "Edit" => match str_param("file_path") {
            Some(path) => format!("Edit: {path}"),
            None => "Edit file".to_owned(),
        },
        "NotebookEdit" => "Edit notebook".to_owned(),
        "Bash" => match str_param("command") {
            Some(cmd) => format!("$ {}", truncate(cmd.trim(), 60)),
            None => "Run command".to_owned(),
        },
        "Read" => match str_param("file_path") {
            Some(path) => format!("Read: {path}"),
            None => "Read file".to_owned(),
        },
        "Glob" | "Grep" => match str_param("pattern") {
            Some(pattern) => format!("Search: {}", truncate(pattern, 60)),
            None => "Search".to_owned(),
        },
        "Task" => match str_param("description") {
            Some(desc) => truncate(desc, 60).to_owned(),
            None => "Run task".to_owned(),
        },
        "TodoWrite" => "Update todo list".to_owned(),
        other => other.to_owned(),
    }
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

// ─── Debounce ───────────────────────────────────────────────────────

/// Pending filesystem changes, released once a path has been quiet for
/// the debounce threshold.
pub struct Debouncer {
    threshold: Duration,
    pending: HashMap<PathBuf, Instant>,
}

impl Debouncer {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            pending: HashMap::new(),
        }
    }

    pub fn touch(&mut self, path: PathBuf, now: Instant) {
        self.pending.insert(path, now);
    }

    /// Drain paths whose last change is older than the threshold.
    pub fn release(&mut self, now: Instant) -> Vec<PathBuf> {
        let ready: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, last)| now.duration_since(**last) >= self.threshold)
            .map(|(path, _)| path.clone())
            .collect();
        for path in &ready {
            self.pending.remove(path);
        }
        ready
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

// ─── Watch loop ─────────────────────────────────────────────────────

fn dispatch(client: &NotifyClient, tracker: &Arc<Mutex<CorrelationTracker>>, outbound: Outbound) {
    match outbound {
        Outbound::Create(req) => {
            let client = client.clone();
            let tracker = Arc::clone(tracker);
            tokio::spawn(async move {
                let correlation_id = req.correlation_id.clone();
                if client.create(&req).await {
                    lock_tracker(&tracker).mark_notification_sent(&correlation_id);
                }
            });
        }
        Outbound::Dismiss {
            correlation_id,
            is_error,
        } => {
            let client = client.clone();
            tokio::spawn(async move {
                client.dismiss(&correlation_id, is_error).await;
            });
        }
    }
}

fn is_transcript(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "jsonl")
}

/// Project directory to watch: the queried one, or the most recently
/// modified directory under the root.
fn resolve_project_dir(root: &Path, query: Option<&str>) -> Option<PathBuf> {
    if let Some(query) = query {
        return discovery::find_project_dir(root, query);
    }
    let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
    let entries = std::fs::read_dir(root).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
            continue;
        };
        if newest.as_ref().is_none_or(|(best, _)| modified > *best) {
            newest = Some((modified, path));
        }
    }
    newest.map(|(_, path)| path)
}

/// Run the watching client until ctrl-c or SIGTERM.
pub async fn run_watch(opts: WatchOpts) -> anyhow::Result<()> {
    let root = opts
        .projects_dir
        .clone()
        .unwrap_or_else(default_projects_dir);

    if opts.list {
        for name in discovery::list_projects(&root) {
            println!("{name}");
        }
        return Ok(());
    }

    let Some(project_dir) = resolve_project_dir(&root, opts.project.as_deref()) else {
        anyhow::bail!(
            "no project directory found under {} (query: {:?})",
            root.display(),
            opts.project
        );
    };

    let client = NotifyClient::new(&opts.url, RetryPolicy::default())?;
    let mut policy = ApprovalPolicy::new();
    for prefix in &opts.allow_prefixes {
        policy.allow_prefix(prefix);
    }
    let mut state = WatchState::new(policy, opts.verbose);
    let tracker = state.tracker();

    info!(
        project = %project_dir.display(),
        url = %opts.url,
        session = %state.session_id(),
        "watching transcripts"
    );

    // Bridge synchronous notify callbacks into async land.
    let (notify_tx, mut notify_rx) = mpsc::channel::<notify::Result<notify::Event>>(256);
    let mut watcher: RecommendedWatcher = notify::recommended_watcher(move |res| {
        let _ = notify_tx.blocking_send(res);
    })?;
    if let Err(e) = watcher.watch(&project_dir, RecursiveMode::NonRecursive) {
        warn!(
            path = %project_dir.display(),
            error = %e,
            "filesystem watch failed, relying on polling only"
        );
    }

    let mut debouncer = Debouncer::new(Duration::from_millis(opts.debounce_ms));
    let mut tails: HashMap<PathBuf, TranscriptTail> = HashMap::new();
    if let Some(active) = discovery::active_transcript(&project_dir) {
        info!(path = %active.display(), "tailing active transcript");
        tails.insert(active.clone(), TranscriptTail::new(active));
    }

    let mut poll = tokio::time::interval(Duration::from_millis(opts.poll_ms.max(50)));
    poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut last_cleanup = Instant::now();
    let mut watcher_alive = true;

    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => info!("received ctrl-c, shutting down"),
                _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
            }
        }

        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            info!("received ctrl-c, shutting down");
        }
    };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            event = notify_rx.recv(), if watcher_alive => {
                match event {
                    Some(Ok(event)) => {
                        if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                            let now = Instant::now();
                            for path in event.paths {
                                if is_transcript(&path) {
                                    debouncer.touch(path, now);
                                }
                            }
                        }
                    }
                    Some(Err(e)) => warn!(error = %e, "filesystem watcher error"),
                    None => {
                        warn!("filesystem watcher channel closed, polling only");
                        watcher_alive = false;
                    }
                }
            }
            _ = poll.tick() => {
                // Polling fallback: pick up a newly active transcript
                // even if its create event was missed.
                if let Some(active) = discovery::active_transcript(&project_dir) {
                    if !tails.contains_key(&active) {
                        info!(path = %active.display(), "tailing active transcript");
                        tails.insert(active.clone(), TranscriptTail::new(active.clone()));
                    }
                    debouncer.touch(active, Instant::now());
                }

                let now_instant = Instant::now();
                let now = Utc::now();
                for path in debouncer.release(now_instant) {
                    let tail = tails
                        .entry(path.clone())
                        .or_insert_with(|| TranscriptTail::new(path));
                    for line in tail.read_new_lines() {
                        for outbound in state.process_line(&line, now) {
                            dispatch(&client, &tracker, outbound);
                        }
                    }
                }

                if last_cleanup.elapsed() >= TRACKER_CLEANUP_EVERY {
                    lock_tracker(&tracker).cleanup(TRACKER_MAX_AGE, now);
                    last_cleanup = now_instant;
                }
            }
            () = &mut shutdown => break,
        }
    }

    // Best effort; the broker also reaps idle sessions on its own.
    client.end_session(state.session_id()).await;
    info!("watcher stopped");
    Ok(())
}

// ─── Tests ──────────────────────────────────────────────────────────
