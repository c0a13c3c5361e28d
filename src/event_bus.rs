//! Layer C13 — real-time event fan-out for observers (spec §4.13).
//!
//! Every transition publishes on the single `queue-updates` pub-sub channel so an
//! external SSE layer (out of scope here) can stream it to dashboards. We also fan
//! events out locally over a `tokio::sync::broadcast` channel, which is what this
//! crate's own tests subscribe to instead of standing up a Redis subscriber.

use crate::keys::EVENT_CHANNEL;
use crate::store::Store;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    TaskCreated {
        id: String,
        depths: QueueDepths,
        ts: f64,
    },
    TaskStateChanged {
        id: String,
        old_state: String,
        new_state: String,
        depths: QueueDepths,
        ts: f64,
    },
    QueueSnapshot {
        depths: QueueDepths,
        state_counts: HashMap<String, u64>,
        retry_ratio: f64,
        ts: f64,
    },
}

impl Event {
    pub fn ts(&self) -> f64 {
        match self {
            Event::TaskCreated { ts, .. } => *ts,
            Event::TaskStateChanged { ts, .. } => *ts,
            Event::QueueSnapshot { ts, .. } => *ts,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct QueueDepths {
    pub primary: i64,
    pub retry: i64,
    pub scheduled: i64,
    pub dlq: i64,
}

pub struct EventBus {
    store: Store,
    local: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(store: Store) -> Self {
        let (local, _) = broadcast::channel(1024);
        EventBus { store, local }
    }

    /// Subscribe to events observed by this process (does not see events
    /// published by other worker processes — that fan-out happens over the
    /// Redis channel, consumed by the out-of-scope dashboard layer).
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.local.subscribe()
    }

    pub async fn publish(&self, event: Event) -> crate::error::CoreResult<()> {
        let payload = serde_json::to_string(&event)?;
        self.store.publish(EVENT_CHANNEL, &payload).await?;
        let _ = self.local.send(event);
        Ok(())
    }
}
