//! End-to-end lifecycle checks against a real Redis instance. Skipped gracefully
//! when none is reachable, matching the connectivity check the worker binary
//! itself uses at startup.

use std::collections::HashMap;
use std::sync::Arc;
use taskflow_core::config::RedisConfig;
use taskflow_core::event_bus::{Event, EventBus};
use taskflow_core::queue_router::QueueRouter;
use taskflow_core::store::Store;
use taskflow_core::task_repo::TaskRepo;
use taskflow_core::types::{TaskKind, TaskState};

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
async fn create_then_complete_round_trips_through_redis() {
    let Some(store) = connected_store().await else {
        eprintln!("skipping: no redis reachable");
        return;
    };

    let router = Arc::new(QueueRouter::new(store.clone()));
    let events = Arc::new(EventBus::new(store.clone()));
    let repo = TaskRepo::new(store, router.clone(), events.clone());

    let now = unix_now();
    let id = repo
        .create(TaskKind::Summarize, "hello world".to_string(), HashMap::new(), 3, now)
        .await
        .expect("create");

    let fetched = repo.fetch(&id).await.expect("fetch").expect("task exists");
    assert_eq!(fetched.state, TaskState::Pending);

    let depths_before = router.depths().await.expect("depths");
    assert!(depths_before.primary >= 1);

    repo.transition(&id, TaskState::Pending, TaskState::Active, Vec::new(), now + 1.0)
        .await
        .expect("pending->active");
    repo.transition(
        &id,
        TaskState::Active,
        TaskState::Completed,
        vec![("result".to_string(), "done".to_string())],
        now + 2.0,
    )
    .await
    .expect("active->completed");

    let completed = repo.fetch(&id).await.expect("fetch").expect("task exists");
    assert_eq!(completed.state, TaskState::Completed);
    assert_eq!(completed.result.as_deref(), Some("done"));
    assert!(completed.state_matches_history());

    repo.delete(&id).await.expect("delete");
    assert!(repo.fetch(&id).await.expect("fetch").is_none());
}

#[tokio::test]
async fn transition_from_stale_expected_state_is_rejected() {
    let Some(store) = connected_store().await else {
        eprintln!("skipping: no redis reachable");
        return;
    };

    let router = Arc::new(QueueRouter::new(store.clone()));
    let events = Arc::new(EventBus::new(store.clone()));
    let repo = TaskRepo::new(store, router, events);

    let now = unix_now();
    let id = repo
        .create(TaskKind::Summarize, "content".to_string(), HashMap::new(), 3, now)
        .await
        .expect("create");

    let err = repo
        .transition(&id, TaskState::Active, TaskState::Completed, Vec::new(), now)
        .await
        .expect_err("task is still pending, not active");
    assert!(matches!(err, taskflow_core::CoreError::IllegalTransition { .. }));

    repo.delete(&id).await.expect("delete");
}

#[tokio::test]
async fn event_bus_fans_out_to_local_subscribers() {
    let Some(store) = connected_store().await else {
        eprintln!("skipping: no redis reachable");
        return;
    };

    let bus = EventBus::new(store);
    let mut rx = bus.subscribe();
    bus.publish(Event::TaskCreated {
        id: "t-1".to_string(),
        depths: Default::default(),
        ts: unix_now(),
    })
    .await
    .expect("publish");

    let event = rx.recv().await.expect("event delivered");
    assert!(matches!(event, Event::TaskCreated { .. }));
}
