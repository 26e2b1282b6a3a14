//! studiod - audio session daemon
//!
//! Loads the configuration, brings up the studio with the in-process server
//! and real app processes, optionally creates or loads a studio, then ticks
//! the command queue until ctrl-c or SIGTERM has unloaded everything.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use studioconf::StudioConfig;
use studiod::{Backends, Studio, StudioDaemon, StudioSettings};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "studiod")]
#[command(about = "Audio session daemon: studios, rooms and their apps")]
#[command(version)]
struct Cli {
    /// Config file, replacing ./studiod.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Where studios are saved
    #[arg(long)]
    studios_dir: Option<PathBuf>,

    /// Create a new studio with this name ("" for a generated one)
    #[arg(long, conflicts_with = "load")]
    new: Option<String>,

    /// Load a saved studio by name
    #[arg(long)]
    load: Option<String>,

    /// Start the studio once it is created or loaded
    #[arg(long)]
    autostart: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config =
        StudioConfig::load_from(cli.config.as_deref()).context("Failed to load config")?;
    if let Some(dir) = cli.studios_dir {
        config.paths.studios_dir = dir;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.telemetry.log_level)),
        )
        .init();

    info!("studiod {} starting", env!("CARGO_PKG_VERSION"));
    info!("Studios directory: {}", config.paths.studios_dir.display());

    let studio = Studio::new(
        StudioSettings::from_config(&config),
        Backends::standalone(&config),
    );
    info!(
        "Room templates: {}",
        studio.template_names().collect::<Vec<_>>().join(", ")
    );
    let mut daemon = StudioDaemon::new(studio);

    if let Some(name) = &cli.load {
        daemon
            .load_studio(name, cli.autostart)
            .with_context(|| format!("Failed to load studio '{}'", name))?;
    } else if let Some(name) = &cli.new {
        daemon.new_studio(name).context("Failed to create studio")?;
        if cli.autostart {
            daemon.start_studio().context("Failed to start studio")?;
        }
    } else if cli.autostart {
        daemon.start_studio().context("Failed to start studio")?;
    }

    daemon
        .run(config.daemon.tick_interval(), shutdown_signal)
        .await;

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT, shutting down...");
        }
        _ = async {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                match signal(SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to set up SIGTERM handler: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}
