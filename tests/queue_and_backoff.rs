//! Integration tests for the Promoter/QueueRouter/RateLimiter/CircuitBreaker
//! interplay. Skips gracefully without a reachable Redis.

use std::sync::Arc;
use taskflow_core::circuit_breaker::CircuitBreaker;
use taskflow_core::config::{RateLimitConfig, RedisConfig};
use taskflow_core::event_bus::EventBus;
use taskflow_core::promoter::Promoter;
use taskflow_core::queue_router::QueueRouter;
use taskflow_core::rate_limiter::RateLimiter;
use taskflow_core::store::Store;
use taskflow_core::task_repo::TaskRepo;
use taskflow_core::types::TaskKind;
use std::collections::HashMap;
use serial_test::serial;

fn test_redis_config() -> RedisConfig {
    RedisConfig {
        url: std::env::var("TASKFLOW_TEST_REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
        max_connections: 5,
        socket_timeout_secs: 5,
        blocking_timeout_secs: 1,
        blocking_socket_slack_secs: 2,
        health_check_interval_secs: 30,
    }
}

async fn connected_store() -> Option<Store> {
    let store = Store::connect(test_redis_config()).await.ok()?;
    store.ping().await.ok()?;
    Some(store)
}

fn unix_now() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[tokio::test]
async fn promoter_moves_due_tasks_into_retry() {
    let Some(store) = connected_store().await else {
        eprintln!("skipping: no redis reachable");
        return;
    };

    let router = Arc::new(QueueRouter::new(store.clone()));
    let events = Arc::new(EventBus::new(store.clone()));
    let repo = Arc::new(TaskRepo::new(store, router.clone(), events));

    let now = unix_now();
    let id = repo
        .create(TaskKind::Summarize, "x".to_string(), HashMap::new(), 3, now)
        .await
        .expect("create");
    router.schedule(&id, now - 1.0).await.expect("schedule in the past");

    let promoter = Promoter::new(router.clone(), repo.clone(), 100, 1);
    let moved = promoter.run_once(now).await.expect("promote");
    assert!(moved >= 1);

    let depths = router.depths().await.expect("depths");
    assert!(depths.retry >= 1);

    repo.delete(&id).await.expect("delete");
}

#[tokio::test]
#[serial]
async fn rate_limiter_grants_then_eventually_denies_a_tiny_bucket() {
    let Some(store) = connected_store().await else {
        eprintln!("skipping: no redis reachable");
        return;
    };
    let _ = store.del(taskflow_core::keys::RATE_LIMIT_BUCKET_KEY).await;
    let _ = store.del(taskflow_core::keys::RATE_LIMIT_CONFIG_KEY).await;

    let limiter = RateLimiter::new(
        store,
        RateLimitConfig { default_requests: 1.0, default_interval_secs: 60.0, acquire_timeout_secs: 1.0 },
    );
    limiter.acquire(1.0, 1.0, unix_now).await.expect("first token granted from empty bucket");
    let result = limiter.acquire(1.0, 0.2, unix_now).await;
    assert!(result.is_err(), "bucket should be exhausted immediately after the first grant");
}

#[tokio::test]
async fn circuit_breaker_opens_after_threshold_failures() {
    let Some(store) = connected_store().await else {
        eprintln!("skipping: no redis reachable");
        return;
    };
    let key = "test:breaker:opens";
    let _ = store.del(key).await;

    let breaker = CircuitBreaker::new(store, key, 2, 60);
    let now = unix_now();

    for _ in 0..2 {
        let _ = breaker
            .guard(now, || async { Err::<(), _>(taskflow_core::CoreError::Other("boom".to_string())) })
            .await;
    }

    let err = breaker.guard(now, || async { Ok::<_, taskflow_core::CoreError>(()) }).await;
    assert!(matches!(err, Err(taskflow_core::CoreError::CircuitOpen(_))));
}
