//! Layer C2 — task CRUD and state transitions (spec §4.2).
//!
//! Grounded on `update_task_state` / `move_to_dlq` / `schedule_task_for_retry` in the
//! original `tasks.py`: every write goes through a single atomic script so that the
//! hash write and the queue placement never disagree, and every transition appends to
//! `state_history` before it is ever visible to a reader (invariant 7).

use crate::error::{CoreError, CoreResult};
use crate::event_bus::{Event, EventBus};
use crate::keys::{self, DLQ_LIST, PRIMARY_QUEUE, RETRY_QUEUE, SCHEDULED_ZSET};
use crate::queue_router::QueueRouter;
use crate::store::Store;
use crate::types::{StateHistoryEntry, Task, TaskId, TaskKind, TaskState};
use std::collections::HashMap;
use std::sync::Arc;

pub struct TaskRepo {
    store: Store,
    router: Arc<QueueRouter>,
    events: Arc<EventBus>,
}

impl TaskRepo {
    pub fn new(store: Store, router: Arc<QueueRouter>, events: Arc<EventBus>) -> Self {
        TaskRepo { store, router, events }
    }

    /// Creates a task record and admits it to the primary queue in one atomic step.
    pub async fn create(&self, kind: TaskKind, content: String, metadata: HashMap<String, String>, max_retries: u32, now: f64) -> CoreResult<TaskId> {
        let id = uuid::Uuid::new_v4().to_string();
        let task = Task::new(id.clone(), kind, content, metadata, max_retries, now);
        self.store
            .create_task_atomic(&keys::task_key(&id), PRIMARY_QUEUE, &id, &task.to_fields())
            .await?;

        let depths = self.router.depths().await?;
        self.events
            .publish(Event::TaskCreated { id: id.clone(), depths, ts: now })
            .await?;
        Ok(id)
    }

    pub async fn fetch(&self, id: &str) -> CoreResult<Option<Task>> {
        let fields = self.store.hget_all(&keys::task_key(id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Task::from_fields(&fields))
    }

    /// Moves `id` from `from` to `to`, merging `patch` fields and appending a
    /// `state_history` entry. Fails with `IllegalTransition` if the stored state
    /// no longer matches `from` (optimistic check, spec §5).
    pub async fn transition(&self, id: &str, from: TaskState, to: TaskState, mut patch: Vec<(String, String)>, now: f64) -> CoreResult<()> {
        patch.push(("state".to_string(), to.as_str().to_string()));
        patch.push(("updated_at".to_string(), now.to_string()));

        let history_entry = StateHistoryEntry { ts: now, state: to };
        let existing = self.fetch(id).await?.ok_or_else(|| CoreError::TaskNotFound(id.to_string()))?;
        let mut history = existing.state_history.clone();
        history.push(history_entry);
        patch.push(("state_history".to_string(), serde_json::to_string(&history)?));

        let applied = self
            .store
            .transition_atomic(&keys::task_key(id), from.as_str(), &patch)
            .await?;
        if !applied {
            return Err(CoreError::IllegalTransition {
                id: id.to_string(),
                expected: vec![from.as_str().to_string()],
                actual: existing.state.as_str().to_string(),
            });
        }

        let depths = self.router.depths().await?;
        self.events
            .publish(Event::TaskStateChanged {
                id: id.to_string(),
                old_state: from.as_str().to_string(),
                new_state: to.as_str().to_string(),
                depths,
                ts: now,
            })
            .await?;
        Ok(())
    }

    /// Re-admits a `failed` or `dlq` task to the retry queue, optionally
    /// resetting `retry_count` to zero. Operator-initiated only (spec §4.2).
    pub async fn retry(&self, id: &str, reset_count: bool, now: f64) -> CoreResult<()> {
        let task = self.fetch(id).await?.ok_or_else(|| CoreError::TaskNotFound(id.to_string()))?;
        if task.state != TaskState::Failed && task.state != TaskState::Dlq {
            return Err(CoreError::IllegalTransition {
                id: id.to_string(),
                expected: vec![TaskState::Failed.as_str().to_string(), TaskState::Dlq.as_str().to_string()],
                actual: task.state.as_str().to_string(),
            });
        }

        let mut patch = Vec::new();
        if reset_count {
            patch.push(("retry_count".to_string(), "0".to_string()));
        }
        self.transition(id, task.state, TaskState::Pending, patch, now).await?;

        if task.state == TaskState::Dlq {
            self.store.lrem(DLQ_LIST, id).await?;
        }
        self.router.admit_retry(id).await?;
        Ok(())
    }

    /// Removes a task record and every queue entry that might reference it.
    /// Idempotent: deleting an unknown id is a no-op, not an error.
    pub async fn delete(&self, id: &str) -> CoreResult<()> {
        self.store
            .delete_task_atomic(&keys::task_key(id), PRIMARY_QUEUE, RETRY_QUEUE, DLQ_LIST, SCHEDULED_ZSET, id)
            .await
    }
}
