//! Local Audit Reverse Proxy
//!
//! Routes HTTP and WebSocket traffic to local targets by domain (and
//! optionally path) and records a queryable audit trail of every request.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌───────────────────────────────────────────────────┐
//!                     │                   AUDIT PROXY                     │
//!   Client Request    │  ┌─────────┐   ┌──────────┐   ┌───────────────┐   │
//!   ──────────────────┼─▶│  http   │──▶│ routing  │──▶│   upstream    │───┼──▶ Target
//!                     │  │ server  │   │ resolver │   │ plain / TLS   │   │
//!                     │  └────┬────┘   └──────────┘   └───────────────┘   │
//!                     │       │ trace id, captured headers/bodies         │
//!                     │       ▼                                           │
//!                     │  ┌───────────────────────────────────────────┐    │
//!                     │  │ observability: traces → logger → buffer,  │    │
//!                     │  │ rotating file, console, live subscribers  │────┼──▶ /logs
//!                     │  └───────────────────────────────────────────┘    │
//!                     │  config (JSON + watcher)      lifecycle           │
//!                     └───────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use audit_proxy::config::load_config;
use audit_proxy::lifecycle::{launch, signals, LaunchOptions};
use audit_proxy::observability::init_console;

#[derive(Parser)]
#[command(name = "audit-proxy")]
#[command(about = "Local reverse proxy with a structured audit trail", long_about = None)]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(short, long, default_value = "audit-proxy.json")]
    config: PathBuf,

    /// Override the proxy listen address (host:port).
    #[arg(long)]
    listen: Option<String>,

    /// Override the log stream listen address (host:port).
    #[arg(long)]
    stream: Option<String>,

    /// Do not watch the configuration file for changes.
    #[arg(long)]
    no_watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Console level comes from the file; a broken file is reported by launch.
    let level = load_config(&cli.config)
        .map(|c| c.global.logging.level)
        .unwrap_or_default();
    init_console(level);

    tracing::info!("audit-proxy v{} starting", env!("CARGO_PKG_VERSION"));

    let running = launch(
        &cli.config,
        LaunchOptions {
            proxy_address: cli.listen,
            stream_address: cli.stream,
            watch: !cli.no_watch,
        },
    )
    .await?;

    if let Some(addr) = running.stream_addr {
        tracing::info!(address = %addr, "Log stream available at ws://{}/logs", addr);
    }

    signals::shutdown_on_signal(running.shutdown()).await;
    running.wait().await;

    tracing::info!("Shutdown complete");
    Ok(())
}
