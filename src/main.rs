use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use otagent::{manager, AgentConfig, CollectorManager};

#[derive(Debug, Parser)]
#[command(
    name = "otagent",
    version,
    about = "Multi-source telemetry collection agent for SCADA/ICS networks"
)]
struct Cli {
    /// Path to the agent configuration file.
    #[arg(
        short,
        long,
        env = "OTAGENT_CONFIG",
        default_value = "/etc/otagent/otagent.yaml"
    )]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string());
    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        %host,
        "otagent starting"
    );

    let config = match AgentConfig::from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "configuration error");
            std::process::exit(exitcode::CONFIG);
        }
    };

    let collector_manager = Arc::new(CollectorManager::from_config(&config));
    manager::set_global_manager(Arc::clone(&collector_manager));

    collector_manager.start().await;

    shutdown_signal().await;

    // A second signal during shutdown forces an immediate exit.
    tokio::spawn(async {
        let _ = tokio::signal::ctrl_c().await;
        error!("second interrupt, exiting immediately");
        std::process::exit(130);
    });

    collector_manager.stop().await;
    manager::reset_global_manager();
    info!("otagent stopped");
    std::process::exit(exitcode::OK);
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received SIGINT, shutting down"),
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("received interrupt, shutting down");
}
