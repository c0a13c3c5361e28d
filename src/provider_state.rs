//! Layer C8 — cached snapshot of the provider's health (spec §4.8).
//!
//! Grounded on `api/openrouter_state.py`'s `OpenRouterStateManager` and the worker-side
//! `WorkerOpenRouterReporter`: the snapshot lives in a Redis hash at `openrouter:state`,
//! a short-TTL lock gates the write path so concurrent workers don't trample each
//! other's update, and a loser just logs and skips — reads never block on the lock.
//! The per-day call counters in `metrics.rs` are bumped in the same pipelined write
//! as the snapshot so the two can never disagree (spec §4.15).

use crate::error::CoreResult;
use crate::keys::{PROVIDER_STATE_KEY, PROVIDER_STATE_LOCK_KEY};
use crate::metrics::Metrics;
use crate::store::Store;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderSnapshot {
    pub state: String,
    pub message: String,
    pub balance: Option<f64>,
    pub usage_today: Option<f64>,
    pub usage_month: Option<f64>,
    pub consecutive_failures: u32,
    pub last_success: Option<f64>,
    pub last_check: f64,
    pub circuit_open: bool,
    pub rate_limit_reset: Option<f64>,
    pub error_details: Option<String>,
}

impl ProviderSnapshot {
    fn to_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![
            ("state".to_string(), self.state.clone()),
            ("message".to_string(), self.message.clone()),
            ("consecutive_failures".to_string(), self.consecutive_failures.to_string()),
            ("last_check".to_string(), self.last_check.to_string()),
            ("circuit_open".to_string(), self.circuit_open.to_string()),
        ];
        if let Some(v) = self.balance {
            fields.push(("balance".to_string(), v.to_string()));
        }
        if let Some(v) = self.usage_today {
            fields.push(("usage_today".to_string(), v.to_string()));
        }
        if let Some(v) = self.usage_month {
            fields.push(("usage_month".to_string(), v.to_string()));
        }
        if let Some(v) = self.last_success {
            fields.push(("last_success".to_string(), v.to_string()));
        }
        if let Some(v) = self.rate_limit_reset {
            fields.push(("rate_limit_reset".to_string(), v.to_string()));
        }
        if let Some(v) = &self.error_details {
            fields.push(("error_details".to_string(), v.clone()));
        }
        fields
    }

    fn from_fields(fields: &HashMap<String, String>) -> Option<Self> {
        Some(ProviderSnapshot {
            state: fields.get("state")?.clone(),
            message: fields.get("message").cloned().unwrap_or_default(),
            balance: fields.get("balance").and_then(|v| v.parse().ok()),
            usage_today: fields.get("usage_today").and_then(|v| v.parse().ok()),
            usage_month: fields.get("usage_month").and_then(|v| v.parse().ok()),
            consecutive_failures: fields.get("consecutive_failures").and_then(|v| v.parse().ok()).unwrap_or(0),
            last_success: fields.get("last_success").and_then(|v| v.parse().ok()),
            last_check: fields.get("last_check").and_then(|v| v.parse().ok()).unwrap_or(0.0),
            circuit_open: fields.get("circuit_open").map(|v| v == "true").unwrap_or(false),
            rate_limit_reset: fields.get("rate_limit_reset").and_then(|v| v.parse().ok()),
            error_details: fields.get("error_details").cloned(),
        })
    }
}

pub struct ProviderState {
    store: Store,
    lock_ttl_secs: u64,
    fresh_secs: i64,
    stale_secs: i64,
}

impl ProviderState {
    pub fn new(store: Store, lock_ttl_secs: u64, fresh_secs: i64, stale_secs: i64) -> Self {
        ProviderState { store, lock_ttl_secs, fresh_secs, stale_secs }
    }

    pub async fn snapshot(&self) -> CoreResult<Option<ProviderSnapshot>> {
        let fields = self.store.hget_all(PROVIDER_STATE_KEY).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        Ok(ProviderSnapshot::from_fields(&fields))
    }

    /// `circuit_open ∨ (state = rate_limited ∧ now < rate_limit_reset)` (spec §4.8).
    pub async fn should_skip_api_call(&self, now: f64) -> CoreResult<bool> {
        let snap = match self.snapshot().await? {
            Some(s) => s,
            None => return Ok(false),
        };
        let rate_limited_and_active =
            snap.state == "rate_limited" && snap.rate_limit_reset.map_or(false, |reset| now < reset);
        Ok(snap.circuit_open || rate_limited_and_active)
    }

    pub fn is_fresh(&self, snap: &ProviderSnapshot, now: f64) -> bool {
        (now - snap.last_check) < self.fresh_secs as f64
    }

    /// Updates the shared snapshot and bumps the day's call counters in one
    /// pipelined write, guarded by the update lock. Returns `false` without
    /// writing anything if another worker already holds the lock (best-effort,
    /// losers skip — spec §4.8, grounded on `WorkerOpenRouterReporter`'s
    /// lock-and-skip behavior).
    pub async fn report_outcome(
        &self,
        success: bool,
        state: &str,
        message: &str,
        error_details: Option<String>,
        metrics: &Metrics,
        now: f64,
    ) -> CoreResult<bool> {
        let lock_value = uuid::Uuid::new_v4().to_string();
        let acquired = self.store.set_nx_ex(PROVIDER_STATE_LOCK_KEY, &lock_value, self.lock_ttl_secs).await?;
        if !acquired {
            debug!("provider state lock held by another worker, skipping update");
            return Ok(false);
        }

        let current = self.snapshot().await?;
        let prior_failures = current.as_ref().map(|s| s.consecutive_failures).unwrap_or(0);
        let (consecutive_failures, last_success) = if success {
            (0u32, Some(now))
        } else {
            (prior_failures + 1, current.as_ref().and_then(|s| s.last_success))
        };
        let circuit_open = consecutive_failures >= 5;
        let rate_limit_reset = if state == "rate_limited" { Some(now + 60.0) } else { None };

        let snap = ProviderSnapshot {
            state: state.to_string(),
            message: message.to_string(),
            balance: current.as_ref().and_then(|s| s.balance),
            usage_today: current.as_ref().and_then(|s| s.usage_today),
            usage_month: current.as_ref().and_then(|s| s.usage_month),
            consecutive_failures,
            last_success,
            last_check: now,
            circuit_open,
            rate_limit_reset,
            error_details,
        };

        let metric_deltas = vec![
            ("total_calls".to_string(), 1i64),
            ((if success { "successful_calls" } else { "failed_calls" }).to_string(), 1),
            (format!("state_{}", snap.state), 1),
        ];
        self.store
            .pipeline_hset_and_hincr(
                PROVIDER_STATE_KEY,
                &snap.to_fields(),
                self.stale_secs.max(1),
                &metrics.today_key(),
                &metric_deltas,
                (metrics.retention_days() as i64) * 86_400,
            )
            .await?;
        self.store.del(PROVIDER_STATE_LOCK_KEY).await?;
        Ok(true)
    }
}
