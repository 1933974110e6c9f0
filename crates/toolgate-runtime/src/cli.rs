//! CLI definition using clap derive.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "toolgate", about = "tool-confirmation notification pipeline")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the broker process (notification state machine + HTTP gateway)
    Serve(ServeOpts),
    /// Start the watching client (transcript tailing + policy + delivery)
    Watch(WatchOpts),
}

#[derive(clap::Args)]
pub struct ServeOpts {
    /// Bind address for the HTTP gateway
    #[arg(long, default_value = "127.0.0.1:8765")]
    pub bind: String,

    /// Allow authenticated non-loopback clients
    #[arg(long)]
    pub remote: bool,

    /// Bearer token required from non-loopback clients
    #[arg(long, env = "TOOLGATE_TOKEN")]
    pub token: Option<String>,

    /// Dedup window in seconds (identical-content collapse)
    #[arg(long, default_value = "10")]
    pub dedup_window_secs: u64,

    /// Burst window in seconds (same-session grouping)
    #[arg(long, default_value = "5")]
    pub burst_window_secs: u64,

    /// Cap on the live notification table and dedup cache
    #[arg(long, default_value = "100")]
    pub max_entries: usize,

    /// Requests allowed per client per rate window
    #[arg(long, default_value = "60")]
    pub rate_limit: u32,

    /// Rate-limit window in seconds
    #[arg(long, default_value = "60")]
    pub rate_window_secs: u64,

    /// Interval between TTL-expiry sweeps, in seconds
    #[arg(long, default_value = "5")]
    pub sweep_interval_secs: u64,
}

#[derive(clap::Args)]
pub struct WatchOpts {
    /// Project to watch, matched as a case-insensitive substring of the
    /// project directory name. Defaults to the most recently active one.
    #[arg(long)]
    pub project: Option<String>,

    /// Root of the Claude Code projects tree
    #[arg(long)]
    pub projects_dir: Option<PathBuf>,

    /// Broker base URL
    #[arg(long, env = "TOOLGATE_URL", default_value = "http://127.0.0.1:8765")]
    pub url: String,

    /// Polling fallback interval in milliseconds
    #[arg(long, default_value = "300")]
    pub poll_ms: u64,

    /// Stability threshold before reading a changed file, in milliseconds
    #[arg(long, default_value = "200")]
    pub debounce_ms: u64,

    /// Also send informational notifications for auto-approved tools
    #[arg(long)]
    pub verbose: bool,

    /// List project directories and exit
    #[arg(long)]
    pub list: bool,

    /// Extra safe Bash prefixes appended to the auto-approval whitelist
    #[arg(long = "allow-prefix")]
    pub allow_prefixes: Vec<String>,
}

/// Default projects root: `~/.claude/projects`.
pub fn default_projects_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".claude").join("projects")
}
