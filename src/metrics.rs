//! Layer C15 — daily provider-call counters (spec §4.15).
//!
//! Grounded on `openrouter_state_reporter.py`'s daily `HINCRBY` counters keyed by
//! UTC date with a rolling TTL. Every increment here is folded into the same
//! pipeline as the `ProviderState` write in `provider_state.rs::report_outcome`,
//! so a snapshot and its counters never disagree.

use crate::error::CoreResult;
use crate::keys::metrics_key;
use crate::store::Store;
use chrono::Utc;

pub struct Metrics {
    store: Store,
    retention_days: u64,
}

impl Metrics {
    pub fn new(store: Store, retention_days: u64) -> Self {
        Metrics { store, retention_days }
    }

    pub fn today_key(&self) -> String {
        metrics_key(&Utc::now().format("%Y-%m-%d").to_string())
    }

    pub fn retention_days(&self) -> u64 {
        self.retention_days
    }

    pub async fn snapshot(&self, date: &str) -> CoreResult<std::collections::HashMap<String, String>> {
        self.store.hget_all(&metrics_key(date)).await
    }
}
