use clap::Parser;
use std::sync::Arc;
use taskflow_core::config::AppConfig;
use taskflow_core::orphan_sweeper::OrphanSweeper;
use taskflow_core::queue_router::QueueRouter;
use taskflow_core::store::wait_for_store;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _args = Args::parse();
    let config = AppConfig::from_env();
    tracing_subscriber::fmt().with_env_filter(config.monitoring.log_level.clone()).init();

    let store = wait_for_store(&config.redis, 10).await?;
    let router = Arc::new(QueueRouter::new(store.clone()));
    let sweeper = OrphanSweeper::new(store, router);

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64();
    let report = sweeper.sweep(now).await?;
    info!(found = report.found, requeued = report.requeued, errors = report.errors, "sweep complete");
    Ok(())
}
