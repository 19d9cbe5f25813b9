mod cli;
mod server;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use vigil_config::load_settings;
use vigil_core::{Monitor, MonitorConfig, start_scheduler};

use crate::cli::Cli;
use crate::server::AppState;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(err) = run(cli).await {
        error!(error = %err, "vigil exited with an error");
        eprintln!("vigil: {err}");
        std::process::exit(1);
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "info",
        1 => "vigil=debug,info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut settings = load_settings()?;
    if let Some(listen) = cli.listen {
        settings.listen_addr = listen;
    }

    let monitor = Arc::new(Monitor::new(MonitorConfig {
        inventory_path: settings.inventory_path.clone(),
        poller_dir: settings.poller_dir.clone(),
        dashboard_dir: settings.dashboard_dir.clone(),
        secrets_path: settings.secrets_path.clone(),
        token_store_path: settings.token_store_path.clone(),
    }));

    if cli.once {
        let summary = monitor.run_pass().await?;
        info!(
            succeeded = summary.succeeded,
            degraded = summary.degraded,
            removed = summary.removed,
            "single pass complete"
        );
        return Ok(());
    }

    // Initial pass; in service mode a failure (e.g. inventory not yet
    // mounted) is logged rather than fatal, later triggers retry.
    if let Err(err) = monitor.run_pass().await {
        warn!(error = %err, "initial reconciliation pass failed");
    }

    let interval = (settings.refresh_interval_secs > 0)
        .then(|| Duration::from_secs(settings.refresh_interval_secs));
    let (trigger, scheduler) = start_scheduler(Arc::clone(&monitor), interval);

    let state = AppState {
        trigger,
        summaries: monitor.summaries(),
    };
    let listener = TcpListener::bind(&settings.listen_addr).await?;
    info!(addr = %settings.listen_addr, "trigger surface listening");

    axum::serve(listener, server::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.shutdown().await;
    info!("vigil stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        return;
    }
    info!("shutdown requested");
}
