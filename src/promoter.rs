//! Layer C11 — moves due `scheduled` tasks back into rotation (spec §4.11).

use crate::error::CoreResult;
use crate::queue_router::QueueRouter;
use crate::task_repo::TaskRepo;
use crate::types::TaskState;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub struct Promoter {
    router: Arc<QueueRouter>,
    repo: Arc<TaskRepo>,
    batch_size: i64,
    interval_secs: u64,
}

impl Promoter {
    pub fn new(router: Arc<QueueRouter>, repo: Arc<TaskRepo>, batch_size: i64, interval_secs: u64) -> Self {
        Promoter { router, repo, batch_size, interval_secs }
    }

    /// Runs one promotion pass: moves due ids from `scheduled` to `retry`, then
    /// (best-effort, per id) flips the stored `state` field from `scheduled` to
    /// `pending`. The queue move is the atomic step that matters for delivery;
    /// a record whose field update races and loses is picked up fine by the next
    /// orphan sweep, so we don't fold it into the same script.
    pub async fn run_once(&self, now: f64) -> CoreResult<usize> {
        let due = self.router.promote_due(now, self.batch_size).await?;
        for id in &due {
            if let Err(e) = self.repo.transition(id, TaskState::Scheduled, TaskState::Pending, Vec::new(), now).await {
                warn!(id, error = %e, "failed to flip promoted task's state field");
            }
        }
        if !due.is_empty() {
            debug!(count = due.len(), "promoted due tasks");
        }
        Ok(due.len())
    }

    pub async fn run_forever(&self, now: impl Fn() -> f64) {
        loop {
            let t = now();
            if let Err(e) = self.run_once(t).await {
                warn!(error = %e, "promoter pass failed");
            }
            tokio::time::sleep(Duration::from_secs(self.interval_secs)).await;
        }
    }
}
