//! tickwire - standalone host simulator
//!
//! Drives the tick-driven server from a fixed-interval loop with a small demo
//! function registry, standing in for a real scripting host.

mod demo;

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Instant;
use tickwire_server::{Config, Server};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tickwire")]
#[command(about = "Host simulator serving demo functions over the tickwire protocol")]
#[command(version)]
struct Cli {
    /// YAML config file
    #[arg(short, long, env = "TICKWIRE_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on (overrides config)
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Delay between ticks in milliseconds (overrides config)
    #[arg(long)]
    tick_interval_ms: Option<u64>,

    /// Stop after this many ticks
    #[arg(long)]
    max_ticks: Option<u64>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match Config::load_from(cli.config.as_deref()) {
        Ok(c) => {
            if let Some(ref path) = cli.config {
                tracing::info!("Loaded config from {}", path.display());
            }
            c
        }
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            return Err(e.into());
        }
    };

    if let Some(bind) = cli.bind {
        config.network.bind_addr = bind;
    }
    if let Some(ms) = cli.tick_interval_ms {
        config.host.tick_interval_ms = ms;
    }
    config.validate()?;

    tracing::info!("Starting tickwire host simulator");
    tracing::info!("  Bind address: {}", config.network.bind_addr);
    tracing::info!("  Tick interval: {}ms", config.host.tick_interval_ms);
    tracing::info!(
        "  Hold read timeout: {}ms",
        config.network.hold_read_timeout_ms
    );
    tracing::info!("  Extra peers: {:?}", config.network.extra_peers);

    let registry = demo::registry();
    tracing::info!("  Functions: {}", registry.names().join(", "));

    let mut server = Server::bind(config.network.to_server_config(), registry)?;
    let interval = config.host.tick_interval();

    loop {
        let started = Instant::now();
        server.tick();

        let stats = server.stats();
        if cli.max_ticks.is_some_and(|max| stats.ticks >= max) {
            break;
        }

        // A tick that held the connection may already have used up the interval.
        if let Some(remaining) = interval.checked_sub(started.elapsed()) {
            std::thread::sleep(remaining);
        }
    }

    server.disconnect();
    let stats = server.stats();
    tracing::info!(
        "Stopped after {} ticks: {} connections, {} requests, {} errors, {} holds",
        stats.ticks,
        stats.connections_accepted,
        stats.requests_handled,
        stats.errors_returned,
        stats.holds_entered
    );
    Ok(())
}
