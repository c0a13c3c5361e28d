//! Layer C6 — cross-process circuit breaker (spec §4.6).
//!
//! Grounded on `circuit_breaker.py`'s closed/open/half-open state machine. All state
//! lives in a Redis hash and every read-modify-write is a single Lua script, so two
//! worker processes racing the same provider never disagree about whether the
//! breaker is open.

use crate::error::{CoreError, CoreResult};
use crate::store::Store;
use std::future::Future;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    fn parse(s: &str) -> Self {
        match s {
            "open" => BreakerState::Open,
            "half_open" => BreakerState::HalfOpen,
            _ => BreakerState::Closed,
        }
    }
}

pub struct CircuitBreaker {
    store: Store,
    key: String,
    failure_threshold: u32,
    reset_timeout_secs: u64,
}

impl CircuitBreaker {
    pub fn new(store: Store, key: impl Into<String>, failure_threshold: u32, reset_timeout_secs: u64) -> Self {
        CircuitBreaker {
            store,
            key: key.into(),
            failure_threshold,
            reset_timeout_secs,
        }
    }

    /// Runs `f` if the breaker admits a call, reporting the outcome back to the
    /// shared counter either way. Returns `CircuitOpen` without invoking `f` when
    /// the breaker is open and the reset timeout has not yet elapsed.
    pub async fn guard<F, Fut, T>(&self, now: f64, f: F) -> CoreResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CoreResult<T>>,
    {
        let guard = self.store.breaker_guard(&self.key, self.reset_timeout_secs, now).await?;
        if !guard.allowed {
            return Err(CoreError::CircuitOpen(self.key.clone()));
        }

        match f().await {
            Ok(value) => {
                self.store.breaker_report(&self.key, true, self.failure_threshold, now).await?;
                Ok(value)
            }
            Err(err) => {
                self.store.breaker_report(&self.key, false, self.failure_threshold, now).await?;
                Err(err)
            }
        }
    }

    pub async fn state(&self, now: f64) -> CoreResult<BreakerState> {
        let guard = self.store.breaker_guard(&self.key, self.reset_timeout_secs, now).await?;
        Ok(BreakerState::parse(&guard.state))
    }

    /// Operator override used by the control plane (spec §4.14).
    pub async fn force_open(&self) -> CoreResult<()> {
        self.store.breaker_force(&self.key, true).await
    }

    pub async fn force_close(&self) -> CoreResult<()> {
        self.store.breaker_force(&self.key, false).await
    }
}
