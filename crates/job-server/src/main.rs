//! Job orchestration server: loads the catalog, wires the services, and runs the zombie
//! reaper and retention sweep until SIGTERM/SIGINT.

use job_server::{shutdown, Orchestrator, ServerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env()?;
    tracing::info!(
        job_directory = %config.job_directory.display(),
        zombie_threshold_secs = config.zombie_threshold_secs,
        retention_days = config.retention_days,
        "job server starting"
    );

    let orchestrator = Orchestrator::from_config(&config).await?;
    let token = shutdown::install_shutdown_handler()?;
    let tasks = orchestrator.spawn_background(token.clone());

    token.cancelled().await;
    for task in tasks {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "background task ended abnormally");
        }
    }
    tracing::info!("job server stopped");
    Ok(())
}
