use clap::Parser;
use std::sync::Arc;
use taskflow_core::config::AppConfig;
use taskflow_core::event_bus::EventBus;
use taskflow_core::promoter::Promoter;
use taskflow_core::queue_router::QueueRouter;
use taskflow_core::store::wait_for_store;
use taskflow_core::task_repo::TaskRepo;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Run a single promotion pass and exit instead of looping forever.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = AppConfig::from_env();
    tracing_subscriber::fmt().with_env_filter(config.monitoring.log_level.clone()).init();

    let store = wait_for_store(&config.redis, 10).await?;
    let router = Arc::new(QueueRouter::new(store.clone()));
    let events = Arc::new(EventBus::new(store.clone()));
    let repo = Arc::new(TaskRepo::new(store, router.clone(), events));

    let promoter = Promoter::new(router, repo, config.worker.promoter_batch_size as i64, config.worker.promoter_interval_secs);

    if args.once {
        let now = unix_now();
        let moved = promoter.run_once(now).await?;
        info!(moved, "promotion pass complete");
    } else {
        promoter.run_forever(unix_now).await;
    }
    Ok(())
}

fn unix_now() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
