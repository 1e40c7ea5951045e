use std::future::Future;

use config::Config;
use service::Service;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{util::SubscriberInitExt, EnvFilter, FmtSubscriber};
use worker::WorkerReport;

pub mod config;
pub mod dead_letter;
pub mod digest;
pub mod error;
pub mod message;
pub mod queue;
pub mod service;
pub mod store;
pub mod supervisor;
pub mod worker;

fn init_tracing() -> eyre::Result<()> {
    #[cfg(debug_assertions)]
    FmtSubscriber::builder()
        .pretty()
        .with_env_filter(
            EnvFilter::builder()
                .with_env_var("DOCRELAY_LOG")
                .with_default_directive(LevelFilter::INFO.into())
                .from_env()?,
        )
        .finish()
        .try_init()?;

    #[cfg(not(debug_assertions))]
    FmtSubscriber::builder()
        .json()
        .with_env_filter(
            EnvFilter::builder()
                .with_env_var("DOCRELAY_LOG")
                .with_default_directive(LevelFilter::INFO.into())
                .from_env()?,
        )
        .finish()
        .try_init()?;

    Ok(())
}

/// Returns a builder for the main application.
///
/// Without an explicit config, the file named by `DOCRELAY_CONFIG_PATH`
/// (default `config.yaml`) is loaded. Any startup failure is returned as an
/// error; a signal-triggered shutdown returns `Ok(())`.
#[bon::builder(finish_fn = start)]
pub async fn run(config: Option<Config>) -> eyre::Result<()> {
    init_tracing()?;

    let config = match config {
        Some(config) => {
            config.validate()?;
            config
        }
        None => Config::load()?,
    };

    tracing::info!(mappings = config.mappings.len(), "Starting docrelay");

    let service = Service::connect_with(config).await?;

    serve(&service, shutdown_signal()).await;

    Ok(())
}

/// Runs the workers for every configured mapping until `shutdown` resolves,
/// then drains them.
pub async fn serve(
    service: &Service,
    shutdown: impl Future<Output = ()>,
) -> Vec<WorkerReport> {
    let supervisor = service.start();

    shutdown.await;
    tracing::info!("Shutdown signal received, stopping workers");

    let reports = supervisor.shutdown().await;
    tracing::info!(workers = reports.len(), "Relay stopped");

    reports
}

/// Resolves on SIGINT or, on unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C"),
        _ = terminate => tracing::info!("Received terminate signal"),
    }
}
