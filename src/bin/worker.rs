use clap::Parser;
use std::sync::Arc;
use taskflow_core::circuit_breaker::CircuitBreaker;
use taskflow_core::config::AppConfig;
use taskflow_core::control_plane::ControlPlane;
use taskflow_core::dispatcher::{Dispatcher, DispatcherConfig};
use taskflow_core::event_bus::EventBus;
use taskflow_core::executor::{Executor, NaivePageRasterizer};
use taskflow_core::metrics::Metrics;
use taskflow_core::provider::HttpProviderHandler;
use taskflow_core::provider_state::ProviderState;
use taskflow_core::queue_router::QueueRouter;
use taskflow_core::rate_limiter::RateLimiter;
use taskflow_core::store::wait_for_store;
use taskflow_core::task_repo::TaskRepo;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Worker identity used for heartbeats and the control plane reply channel.
    #[arg(long)]
    worker_id: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = AppConfig::from_env();
    init_tracing(&config);

    let worker_id = args.worker_id.unwrap_or_else(|| format!("worker-{}", uuid::Uuid::new_v4()));
    info!(worker_id, "starting taskflow worker");

    let store = wait_for_store(&config.redis, 10).await?;
    let router = Arc::new(QueueRouter::new(store.clone()));
    let events = Arc::new(EventBus::new(store.clone()));
    let repo = Arc::new(TaskRepo::new(store.clone(), router.clone(), events.clone()));

    let rate_limiter = Arc::new(RateLimiter::new(store.clone(), config.rate_limit.clone()));
    let breaker = Arc::new(CircuitBreaker::new(
        store.clone(),
        "openrouter:breaker",
        config.worker.breaker_failure_threshold,
        config.worker.breaker_reset_timeout_secs,
    ));
    let provider_state = Arc::new(ProviderState::new(
        store.clone(),
        config.worker.provider_state_lock_ttl_secs,
        config.worker.provider_state_fresh_secs,
        config.worker.provider_state_stale_secs,
    ));
    let provider = Arc::new(HttpProviderHandler::new(config.provider.clone()));
    let rasterizer = Arc::new(NaivePageRasterizer);
    let metrics = Arc::new(Metrics::new(store.clone(), config.worker.metrics_retention_days));

    let executor = Arc::new(Executor::new(
        repo.clone(),
        router.clone(),
        rate_limiter,
        breaker.clone(),
        provider_state,
        provider,
        rasterizer,
        metrics,
        worker_id.clone(),
    ));

    let control_plane = ControlPlane::new(store.clone(), worker_id.clone(), breaker);
    tokio::spawn(async move {
        if let Err(e) = control_plane.run().await {
            tracing::warn!(error = %e, "control plane listener exited");
        }
    });

    let dispatcher_config = DispatcherConfig {
        heartbeat_ttl_secs: config.worker.heartbeat_ttl_secs,
        heartbeat_interval_secs: config.worker.heartbeat_interval_secs,
        retry_warning_depth: config.worker.retry_warning_depth,
        retry_critical_depth: config.worker.retry_critical_depth,
        blocking_timeout_secs: config.redis.blocking_timeout_secs as f64,
    };
    let dispatcher = Dispatcher::new(worker_id, store, router, executor, dispatcher_config);

    let (tx, rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = tx.send(true);
    });
    dispatcher.run(unix_now, rx).await;
    Ok(())
}

fn unix_now() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

fn init_tracing(config: &AppConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.monitoring.log_level));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if config.monitoring.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redis::Client;

    #[tokio::test]
    async fn test_redis_connection() {
        let client = match Client::open("redis://127.0.0.1:6379") {
            Ok(client) => client,
            Err(_) => return,
        };
        match client.get_async_connection().await {
            Ok(mut conn) => {
                if let Ok(result) = redis::cmd("PING").query_async::<_, String>(&mut conn).await {
                    assert_eq!(result, "PONG");
                }
            }
            Err(_) => {
                // Redis is not available in the test environment; skip gracefully.
            }
        }
    }
}
