//! toolgate: tool-confirmation notification pipeline binary.
//! Single binary hosting both halves: the broker process (`serve`) and
//! the watching client (`watch`).

use clap::Parser;
use toolgate_runtime::{cli, server, watch_loop};

fn init_tracing() {
    let filter = std::env::var("TOOLGATE_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    match args.command {
        cli::Command::Serve(opts) => {
            init_tracing();
            tracing::info!("toolgate broker starting");
            server::run_serve(opts).await?;
        }
        cli::Command::Watch(opts) => {
            init_tracing();
            watch_loop::run_watch(opts).await?;
        }
    }

    Ok(())
}
