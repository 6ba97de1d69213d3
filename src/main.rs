//! Nautilus frame pipeline service

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use nautilus::api;
use nautilus::pipeline::PipelineController;
use nautilus::Config;

#[derive(Debug, Parser)]
#[command(name = "nautilus", version, about = "Background frame-transformation service")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "NAUTILUS_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overrides `server.bind`
    #[arg(short, long)]
    bind: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("nautilus=debug")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    let cli = Cli::parse();
    info!("Nautilus Launching...");

    let mut config = Config::load(cli.config.as_deref())
        .map_err(|e| eyre!("failed to load configuration: {e}"))?;
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }

    let controller = Arc::new(PipelineController::from_config(&config)?);
    if !controller.is_available() {
        warn!("No transformer available, /toggle will be refused");
    }

    #[cfg(feature = "v4l2-capture")]
    let camera = if config.capture.enabled {
        Some(nautilus::capture::CameraFeed::spawn(
            config.capture.clone(),
            controller.clone(),
        )?)
    } else {
        None
    };

    let listener = tokio::net::TcpListener::bind(config.server.bind).await?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, api::create_router(controller.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    #[cfg(feature = "v4l2-capture")]
    {
        if let Some(camera) = camera {
            camera.stop();
        }
    }

    if controller.is_running() {
        if let Some(warning) = controller.stop().await?.timeout_warning() {
            warn!("{warning}");
        }
    }

    info!("Nautilus shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
