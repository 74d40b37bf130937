// HTTP front end for the wound triage worker.
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use triage_worker::{SessionConfig, SessionManager};
use wound_triage::cli::Cli;
use wound_triage::logging::setup_logging;
use wound_triage::web::{serve, AppState};
use wound_triage::{sys_error, sys_info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config().context("loading configuration")?;

    let log_path = setup_logging(&config.logging).context("setting up logging")?;
    sys_info!("Logging to {}", log_path.display());

    let host: IpAddr = config
        .http
        .host
        .parse()
        .with_context(|| format!("invalid listen address `{}`", config.http.host))?;
    let addr = SocketAddr::new(host, config.http.port);

    let session_config = SessionConfig::from_config(&config).context("loading rubric")?;
    sys_info!("Launching worker: {}", config.launch.display_command());
    let session = Arc::new(
        tokio::task::spawn_blocking(move || SessionManager::start(session_config))
            .await
            .context("worker start task")?
            .context("starting worker")?,
    );

    let state = Arc::new(AppState::new(session.clone(), &config));
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            sys_error!("Cannot listen for Ctrl-C: {e}");
        }
        sys_info!("Shutting down");
    };

    let served = serve(addr, state, shutdown).await;

    // Joins the consumption loop, which may be mid-exchange.
    tokio::task::spawn_blocking(move || session.stop())
        .await
        .context("stopping session")?;

    served.context("HTTP server")?;
    Ok(())
}
