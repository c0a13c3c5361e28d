//! Layer C7 — distributed token-bucket rate limiter (spec §4.7).
//!
//! Grounded on `rate_limiter.py`'s refill-then-grant-or-deny script. The bucket
//! state and its configuration live in separate Redis keys so an operator can
//! retune `requests`/`interval` without resetting accumulated tokens.

use crate::config::RateLimitConfig;
use crate::error::{CoreError, CoreResult};
use crate::keys::{RATE_LIMIT_BUCKET_KEY, RATE_LIMIT_CONFIG_KEY};
use crate::store::Store;
use tokio::time::{sleep, Duration};

pub struct RateLimiter {
    store: Store,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(store: Store, config: RateLimitConfig) -> Self {
        RateLimiter { store, config }
    }

    /// Blocks until `requested` tokens are available or `timeout_secs` elapses,
    /// sleeping `min(wait_seconds, remaining_timeout)` between attempts as
    /// reported by the bucket script (spec §4.7 edge case: never oversleep past
    /// the caller's deadline).
    pub async fn acquire(&self, requested: f64, timeout_secs: f64, now: impl Fn() -> f64) -> CoreResult<()> {
        let deadline = now() + timeout_secs;
        loop {
            let t = now();
            let outcome = self
                .store
                .rate_limit_try_acquire(
                    RATE_LIMIT_BUCKET_KEY,
                    RATE_LIMIT_CONFIG_KEY,
                    t,
                    requested,
                    self.config.default_requests,
                    self.config.default_interval_secs,
                )
                .await?;
            if outcome.granted {
                return Ok(());
            }

            let remaining = deadline - t;
            if remaining <= 0.0 {
                return Err(CoreError::RateLimitTimeout(timeout_secs));
            }
            let wait = outcome.wait_seconds.max(0.0).min(remaining);
            sleep(Duration::from_secs_f64(wait.max(0.001))).await;
        }
    }

    /// Convenience wrapper using the configured default timeout.
    pub async fn acquire_one(&self) -> CoreResult<()> {
        self.acquire(1.0, self.config.acquire_timeout_secs, || {
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs_f64()
        })
        .await
    }

    /// Operator-initiated reset, used by the control plane to clear a stuck bucket.
    pub async fn reset_bucket(&self) -> CoreResult<()> {
        self.store.del(RATE_LIMIT_BUCKET_KEY).await
    }
}
