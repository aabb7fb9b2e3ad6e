//! WebSocket connection mediator.
//!
//! # Architecture Overview
//!
//! ```text
//!                        ┌──────────────────────────────────────────────────┐
//!                        │                    MEDIATOR                      │
//!                        │                                                  │
//!   Client bytes         │  ┌─────────┐    ┌───────────┐    ┌───────────┐   │
//!   ─────────────────────┼─▶│   net   │───▶│   http    │───▶│ protocol  │   │
//!                        │  │listener │    │ assembler │    │ registry  │   │
//!                        │  │ server  │    └───────────┘    └─────┬─────┘   │
//!                        │  └────▲────┘                           │         │
//!                        │       │                                ▼         │
//!                        │       │         ┌───────────┐    ┌───────────┐   │
//!   Client frames        │       └─────────│ mediator  │◀───│  routing  │   │
//!   ◀────────────────────┼─────────────────│  engine   │    │ directory │   │
//!                        │                 └─────┬─────┘    └───────────┘   │
//!                        │                       ▼                          │
//!                        │                 ┌───────────┐                    │
//!                        │                 │    app    │                    │
//!                        │                 │ handlers  │                    │
//!                        │                 └───────────┘                    │
//!                        │                                                  │
//!                        │   config · observability · lifecycle             │
//!                        └──────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use websocket_mediator::config::{load_config, MediatorConfig};
use websocket_mediator::lifecycle::{spawn_signal_listener, start, Shutdown};
use websocket_mediator::observability::{logging, metrics};
use websocket_mediator::WebSocketServer;

#[derive(Debug, Parser)]
#[command(name = "websocket-mediator", version, about = "WebSocket connection mediator")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "MEDIATOR_CONFIG")]
    config: Option<PathBuf>,

    /// Override the listener bind address.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => MediatorConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.listener.bind_address = bind;
    }

    logging::init_logging(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "websocket-mediator starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        applications = config.applications.len(),
        fanout = ?config.fanout,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let (mediator, listener) = start(&config).await?;
    let server = WebSocketServer::new(Arc::new(mediator));

    let shutdown = Shutdown::new();
    spawn_signal_listener(shutdown.clone());
    server.run(listener, &shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
