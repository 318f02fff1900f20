//! Mesh scheduler driver (§2 "Driver"): wires the resource view, the
//! scheduling pipeline, the schedule queue, instance/group control and
//! the underlayer transport into one long-running process, following
//! the teacher's `main.rs` CLI/tracing/shutdown-signal conventions.

mod cli;
mod transport;
mod wiring;

use clap::Parser;
use cli::Cli;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = scheduler_shared::SchedulerConfig::load(cli.config.as_deref())
        .map_err(|e| anyhow::anyhow!("failed to load configuration: {e}"))?;
    if let Some(node_id) = cli.node_id {
        config.node_id = Some(node_id);
    }
    if let Some(log_level) = cli.log_level {
        config.logging.level = log_level;
    }

    init_tracing(&config.logging.level);
    info!(version = scheduler_shared::VERSION, "starting mesh scheduler");

    let scheduler = wiring::Scheduler::build(config).await?;
    info!(node_id = %scheduler.node_id, "scheduler actors initialized");

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    scheduler.spawn_background_tasks(shutdown_rx.clone());

    let transport_task = tokio::spawn(transport::start(
        scheduler.underlayer.clone(),
        underlayer::TransportConfig::default(),
        shutdown_rx,
    ));

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, stopping scheduler");
    let _ = shutdown_tx.send(true);

    match transport_task.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => error!(%err, "underlayer transport exited with an error"),
        Err(err) => error!(%err, "underlayer transport task panicked"),
    }

    info!("mesh scheduler stopped");
    Ok(())
}

fn init_tracing(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .init();
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("received Ctrl+C"),
            _ = sigterm.recv() => info!("received SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
