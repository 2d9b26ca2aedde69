//! Virtual server daemon.
//!
//! # Architecture Overview
//!
//! ```text
//!   vserver.toml
//!        │
//!        ▼
//!   ┌─────────┐   ┌──────────────────────────── orchestrator ───────────────────────────┐
//!   │ config  │──▶│ bootstrap ──────────▶ instantiate ─────────────▶ open               │
//!   │ loader  │   │  namespace check       compile policies           conflict index     │
//!   └─────────┘   │  dictionary cache      dispatch tables            bind sockets       │
//!                 │  protocol plugins      instantiate hooks          scheduler          │
//!                 └─────────────────────────────────────────────────────────────────────┘
//!                                                │
//!                                   ArcSwap publish ──▶ admin API ◀── vserver-cli
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use vserver::admin::{self, AdminState};
use vserver::config::load_config;
use vserver::lifecycle::{signals, startup, Shutdown};
use vserver::net::IoRegistry;
use vserver::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "vserver")]
#[command(about = "Virtual server daemon", long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "vserver.toml")]
    config: PathBuf,

    /// Validate the configuration (bootstrap and instantiate) and exit
    #[arg(short = 'C', long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let loaded = load_config(&args.config)?;
    logging::init(&loaded.settings.observability)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        "vserver starting"
    );

    let settings = loaded.settings;
    let tree = Arc::new(loaded.tree);
    let services = startup::services_from_settings(&settings);

    if args.check {
        let orchestrator = startup::check(services, tree)?;
        print!("{}", orchestrator.show_server_list());
        tracing::info!("Configuration OK");
        return Ok(());
    }

    if settings.observability.metrics_enabled {
        if let Ok(addr) = settings.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %settings.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let shutdown = Shutdown::new();
    let io = Arc::new(IoRegistry::new());
    let admin_state = AdminState::new(io.clone(), settings.admin.api_key.clone());

    let admin_task = if settings.admin.enabled {
        let listener = TcpListener::bind(&settings.admin.bind_address).await?;
        Some(tokio::spawn(admin::serve(
            admin_state.clone(),
            listener,
            shutdown.subscribe(),
        )))
    } else {
        None
    };

    let orchestrator = match startup::start(services, tree, io.as_ref()).await {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            tracing::error!(error = %e, kind = ?e.kind(), "Startup failed");
            shutdown.trigger();
            io.close();
            return Err(e.into());
        }
    };
    admin_state.publish(Arc::new(orchestrator));

    signals::wait_for_shutdown().await;
    tracing::info!("Shutting down");
    shutdown.trigger();

    if let Some(task) = admin_task {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "Admin API task ended abnormally");
        }
    }
    let closed = io.close();

    tracing::info!(sockets = closed, "Shutdown complete");
    Ok(())
}
