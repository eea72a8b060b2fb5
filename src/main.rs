// src/main.rs

//! The control plane's entry point: loads configuration, initializes
//! logging, constructs an empty `ClusterState`, and logs readiness. The
//! RPC dispatch loop that would serve requests against this state is out
//! of scope here (spec §1).

use anyhow::Result;
use std::env;
use std::sync::Arc;
use stormcore::config::Config;
use stormcore::core::ClusterState;
use tracing::info;
use tracing_subscriber::{filter::EnvFilter, prelude::*, reload};

#[tokio::main]
async fn main() -> Result<()> {
    run_app().await
}

async fn run_app() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    let args: Vec<String> = env::args().collect();

    if args.contains(&"--version".to_string()) {
        println!("stormcore version {VERSION}");
        return Ok(());
    }

    let config_path = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
        .unwrap_or("config.toml");

    let config = match Config::from_file(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration from \"{config_path}\": {e}");
            std::process::exit(1);
        }
    };

    let initial_log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    let (filter, reload_handle) = reload::Layer::new(EnvFilter::new(initial_log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact().with_ansi(true))
        .init();

    // Held for dynamic log-level changes via a future admin surface; not
    // wired to anything yet.
    let _reload_handle = Arc::new(reload_handle);

    let state = ClusterState::new(&config);
    info!(
        elliptics_nodes = config.elliptics_nodes.len(),
        "stormcore ready: empty cluster state constructed, {:?}",
        state
    );

    Ok(())
}
