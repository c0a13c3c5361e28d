//! Layer C12 — recovers `pending` records that fell out of every queue (spec §4.12).
//!
//! Grounded on the original consumer's startup reconciliation pass: a crash between
//! `HSET state=pending` and `LPUSH` (or a queue entry lost to a Redis restart without
//! AOF) leaves a task record with no corresponding queue entry. This never runs on
//! the hot path; it's invoked on demand by an operator or a periodic maintenance job.

use crate::error::CoreResult;
use crate::keys::{self, PRIMARY_QUEUE};
use crate::queue_router::QueueRouter;
use crate::store::Store;
use crate::types::{Task, TaskState};
use tracing::warn;

#[derive(Debug, Default, Clone, Copy)]
pub struct SweepReport {
    pub found: usize,
    pub requeued: usize,
    pub errors: usize,
}

pub struct OrphanSweeper {
    store: Store,
    router: std::sync::Arc<QueueRouter>,
}

impl OrphanSweeper {
    pub fn new(store: Store, router: std::sync::Arc<QueueRouter>) -> Self {
        OrphanSweeper { store, router }
    }

    pub async fn sweep(&self, now: f64) -> CoreResult<SweepReport> {
        let queued = self.router.all_queued_ids().await?;
        let task_ids = self.store.scan("task:").await?;

        let mut report = SweepReport::default();
        for task_key in task_ids {
            let Some(id) = task_key.strip_prefix("task:") else { continue };
            let fields = match self.store.hget_all(&task_key).await {
                Ok(f) => f,
                Err(e) => {
                    warn!(id, error = %e, "failed to read task record during sweep");
                    report.errors += 1;
                    continue;
                }
            };
            let Some(task) = Task::from_fields(&fields) else { continue };
            if task.state != TaskState::Pending || queued.contains(id) {
                continue;
            }

            report.found += 1;
            match self.store.lpush(PRIMARY_QUEUE, id).await {
                Ok(()) => {
                    if let Err(e) = self.store.hset_all(&keys::task_key(id), &[("updated_at".to_string(), now.to_string())]).await {
                        warn!(id, error = %e, "requeued task but failed to stamp updated_at");
                    }
                    report.requeued += 1;
                }
                Err(e) => {
                    warn!(id, error = %e, "failed to requeue orphaned task");
                    report.errors += 1;
                }
            }
        }
        Ok(report)
    }
}
