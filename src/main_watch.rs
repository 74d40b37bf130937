// Directory-watching front end for the wound triage worker.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;

use triage_worker::{SessionConfig, SessionManager};
use wound_triage::cli::Cli;
use wound_triage::logging::setup_logging;
use wound_triage::watch::{DirectoryWatcher, WatchExit};
use wound_triage::{sys_error, sys_info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config().context("loading configuration")?;

    let log_path = setup_logging(&config.logging).context("setting up logging")?;
    sys_info!("Logging to {}", log_path.display());

    let mut watcher = DirectoryWatcher::new(&config.watch)
        .with_context(|| format!("preparing {}", config.watch.dir.display()))?;

    let session_config = SessionConfig::from_config(&config).context("loading rubric")?;
    sys_info!("Launching worker: {}", config.launch.display_command());

    let shutdown = Arc::new(AtomicBool::new(false));
    let mut watch_task = tokio::task::spawn_blocking({
        let shutdown = shutdown.clone();
        move || -> anyhow::Result<WatchExit> {
            let session = SessionManager::start(session_config).context("starting worker")?;
            let exit = watcher.run(&session, &shutdown);
            session.stop();
            Ok(exit)
        }
    });

    let exit = tokio::select! {
        joined = &mut watch_task => joined,
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                sys_error!("Cannot listen for Ctrl-C: {e}");
            }
            sys_info!("Shutting down");
            shutdown.store(true, Ordering::SeqCst);
            watch_task.await
        }
    };

    match exit.context("watch task")?? {
        WatchExit::Shutdown | WatchExit::SessionStopped => Ok(()),
        WatchExit::SessionFailed(reason) => {
            sys_error!("Worker session failed: {reason}");
            bail!("worker session failed: {reason}")
        }
    }
}
