//! Layer C3 — thin queue-naming façade over the Store (spec §4.3).

use crate::error::CoreResult;
use crate::event_bus::QueueDepths;
use crate::keys::{DLQ_LIST, PRIMARY_QUEUE, RETRY_QUEUE, SCHEDULED_ZSET};
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueName {
    Primary,
    Retry,
    Scheduled,
    Dlq,
}

impl QueueName {
    fn key(&self) -> &'static str {
        match self {
            QueueName::Primary => PRIMARY_QUEUE,
            QueueName::Retry => RETRY_QUEUE,
            QueueName::Scheduled => SCHEDULED_ZSET,
            QueueName::Dlq => DLQ_LIST,
        }
    }
}

pub struct QueueRouter {
    store: Store,
}

impl QueueRouter {
    pub fn new(store: Store) -> Self {
        QueueRouter { store }
    }

    pub async fn admit(&self, id: &str) -> CoreResult<()> {
        self.store.lpush(PRIMARY_QUEUE, id).await
    }

    /// Re-admits an operator-retried task to the retry queue, not primary
    /// (spec §4.2: `retry` "enqueues in `retry`", distinct from new work).
    pub async fn admit_retry(&self, id: &str) -> CoreResult<()> {
        self.store.lpush(RETRY_QUEUE, id).await
    }

    /// Pop from `queues` in the given priority order, blocking up to `timeout_secs`.
    /// Returns `None` on timeout (spec §4.3).
    pub async fn dequeue_blocking(&self, queues: &[QueueName], timeout_secs: f64) -> CoreResult<Option<(QueueName, String)>> {
        let keys: Vec<String> = queues.iter().map(|q| q.key().to_string()).collect();
        match self.store.blpop(&keys, timeout_secs).await? {
            None => Ok(None),
            Some((key, id)) => {
                let name = queues
                    .iter()
                    .find(|q| q.key() == key)
                    .copied()
                    .unwrap_or(QueueName::Primary);
                Ok(Some((name, id)))
            }
        }
    }

    pub async fn schedule(&self, id: &str, due_epoch: f64) -> CoreResult<()> {
        self.store.zadd(SCHEDULED_ZSET, id, due_epoch).await
    }

    /// Moves due entries from `scheduled` to `retry` in one atomic script.
    /// Returns the ids moved. Safe to call concurrently (spec §5 commutativity).
    pub async fn promote_due(&self, now: f64, max: i64) -> CoreResult<Vec<String>> {
        self.store.promote_due_atomic(SCHEDULED_ZSET, RETRY_QUEUE, now, max).await
    }

    pub async fn send_to_dlq(&self, id: &str) -> CoreResult<()> {
        self.store.lpush(DLQ_LIST, id).await
    }

    pub async fn depths(&self) -> CoreResult<QueueDepths> {
        Ok(QueueDepths {
            primary: self.store.llen(PRIMARY_QUEUE).await?,
            retry: self.store.llen(RETRY_QUEUE).await?,
            scheduled: self.store.zcard(SCHEDULED_ZSET).await?,
            dlq: self.store.llen(DLQ_LIST).await?,
        })
    }

    pub async fn sample(&self, queue: QueueName, limit: isize) -> CoreResult<Vec<String>> {
        match queue {
            QueueName::Scheduled => self.store.zrangebyscore(SCHEDULED_ZSET, f64::MIN, f64::MAX).await,
            other => self.store.lrange(other.key(), 0, limit.saturating_sub(1)).await,
        }
    }

    /// Union of ids present in every live queue. Used by the OrphanSweeper.
    pub async fn all_queued_ids(&self) -> CoreResult<std::collections::HashSet<String>> {
        let mut set = std::collections::HashSet::new();
        set.extend(self.store.lrange(PRIMARY_QUEUE, 0, -1).await?);
        set.extend(self.store.lrange(RETRY_QUEUE, 0, -1).await?);
        set.extend(self.store.lrange(DLQ_LIST, 0, -1).await?);
        set.extend(self.store.zrangebyscore(SCHEDULED_ZSET, f64::MIN, f64::MAX).await?);
        Ok(set)
    }

    pub fn store(&self) -> &Store {
        &self.store
    }
}
