//! Layer C9 — per-worker pop loop (spec §4.9).
//!
//! Grounded on the original consumer's main loop: a heartbeat key refreshed on a
//! timer, an adaptive retry-ratio that leans harder on the primary queue as the
//! retry backlog grows, and a `BLPOP` across both queues that also functions as the
//! loop's only suspension point — its 5s timeout is what lets the process notice a
//! shutdown signal or refresh the heartbeat without a separate ticker task.

use crate::executor::Executor;
use crate::keys::worker_heartbeat_key;
use crate::queue_router::{QueueName, QueueRouter};
use crate::store::Store;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct DispatcherConfig {
    pub heartbeat_ttl_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub retry_warning_depth: u64,
    pub retry_critical_depth: u64,
    pub blocking_timeout_secs: f64,
}

pub struct Dispatcher {
    worker_id: String,
    store: Store,
    router: Arc<QueueRouter>,
    executor: Arc<Executor>,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(worker_id: String, store: Store, router: Arc<QueueRouter>, executor: Arc<Executor>, config: DispatcherConfig) -> Self {
        Dispatcher { worker_id, store, router, executor, config }
    }

    /// `<warning → 0.3`, `[warning, critical) → 0.2`, `≥critical → 0.1` (spec §4.9).
    fn retry_ratio(&self, retry_depth: i64) -> f64 {
        let depth = retry_depth.max(0) as u64;
        if depth < self.config.retry_warning_depth {
            0.3
        } else if depth < self.config.retry_critical_depth {
            0.2
        } else {
            0.1
        }
    }

    async fn heartbeat(&self, now: f64) {
        let key = worker_heartbeat_key(&self.worker_id);
        if let Err(e) = self.store.setex(&key, &now.to_string(), self.config.heartbeat_ttl_secs).await {
            warn!(worker = %self.worker_id, error = %e, "heartbeat write failed");
        }
    }

    /// Runs until `shutdown` resolves. Each iteration: maybe refresh heartbeat,
    /// compute the adaptive queue order, BLPOP, and hand any popped id to the
    /// Executor. A BLPOP timeout is not an error — it's the liveness tick.
    pub async fn run(&self, now: impl Fn() -> f64, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(worker = %self.worker_id, "dispatcher started");
        let mut last_heartbeat = 0.0_f64;

        loop {
            if *shutdown.borrow() {
                break;
            }
            let t = now();
            if t - last_heartbeat >= self.config.heartbeat_interval_secs as f64 {
                self.heartbeat(t).await;
                last_heartbeat = t;
            }

            let depths = match self.router.depths().await {
                Ok(d) => d,
                Err(e) => {
                    warn!(error = %e, "failed to read queue depths, defaulting order");
                    crate::event_bus::QueueDepths::default()
                }
            };
            let ratio = self.retry_ratio(depths.retry);
            let draw: f64 = rand::thread_rng().gen_range(0.0..1.0);
            let order = if draw <= ratio {
                [QueueName::Retry, QueueName::Primary]
            } else {
                [QueueName::Primary, QueueName::Retry]
            };

            match self.router.dequeue_blocking(&order, self.config.blocking_timeout_secs).await {
                Ok(Some((_queue, id))) => {
                    self.executor.run_task(&id, now()).await;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "blpop failed, backing off briefly");
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
            }
        }
        info!(worker = %self.worker_id, "dispatcher stopped");
    }
}
