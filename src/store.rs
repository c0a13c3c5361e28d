//! Layer C1 — typed wrapper over Redis.
//!
//! Every other component talks to Redis exclusively through this module. Non-blocking
//! commands and Lua scripts run over a shared, auto-reconnecting [`ConnectionManager`];
//! `BLPOP` and pub/sub run over dedicated connections opened on demand so a long-blocking
//! read never starves ordinary traffic (spec §4.1 connection-pool contract).

use crate::config::RedisConfig;
use crate::error::{CoreError, CoreResult, StoreErrorKind};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

const TRANSITION_SCRIPT: &str = r#"
local task_key = KEYS[1]
local expected = ARGV[1]
local current = redis.call('HGET', task_key, 'state')
if current == false then
  return {0, false}
end
if current ~= expected then
  return {0, current}
end
for i = 2, #ARGV, 2 do
  redis.call('HSET', task_key, ARGV[i], ARGV[i + 1])
end
return {1, current}
"#;

const CREATE_TASK_SCRIPT: &str = r#"
local task_key = KEYS[1]
local queue_key = KEYS[2]
local id = ARGV[1]
for i = 2, #ARGV, 2 do
  redis.call('HSET', task_key, ARGV[i], ARGV[i + 1])
end
redis.call('LPUSH', queue_key, id)
return 1
"#;

const DELETE_TASK_SCRIPT: &str = r#"
local task_key = KEYS[1]
local primary = KEYS[2]
local retry = KEYS[3]
local dlq = KEYS[4]
local scheduled = KEYS[5]
local id = ARGV[1]
redis.call('DEL', task_key)
redis.call('LREM', primary, 0, id)
redis.call('LREM', retry, 0, id)
redis.call('LREM', dlq, 0, id)
redis.call('ZREM', scheduled, id)
return 1
"#;

const PROMOTE_DUE_SCRIPT: &str = r#"
local scheduled = KEYS[1]
local retry = KEYS[2]
local now = tonumber(ARGV[1])
local limit = tonumber(ARGV[2])
local due = redis.call('ZRANGEBYSCORE', scheduled, '-inf', now, 'LIMIT', 0, limit)
for _, id in ipairs(due) do
  redis.call('LPUSH', retry, id)
  redis.call('ZREM', scheduled, id)
end
return due
"#;

/// Atomic failure-counter update for the circuit breaker (spec §4.6).
const BREAKER_REPORT_SCRIPT: &str = r#"
local key = KEYS[1]
local success = tonumber(ARGV[1])
local threshold = tonumber(ARGV[2])
local now = tonumber(ARGV[3])

local data = redis.call('HMGET', key, 'consecutive_failures', 'state', 'opened_at')
local failures = tonumber(data[1]) or 0
local state = data[2] or 'closed'
local opened_at = tonumber(data[3]) or 0

if success == 1 then
  failures = 0
  state = 'closed'
  opened_at = 0
else
  failures = failures + 1
  if state == 'half_open' or failures >= threshold then
    state = 'open'
    opened_at = now
  end
end

redis.call('HSET', key, 'consecutive_failures', failures, 'state', state, 'opened_at', opened_at)
return {failures, state, opened_at}
"#;

/// Non-mutating-unless-probing guard check (spec §4.6 half-open transition).
const BREAKER_GUARD_SCRIPT: &str = r#"
local key = KEYS[1]
local reset_timeout = tonumber(ARGV[1])
local now = tonumber(ARGV[2])

local data = redis.call('HMGET', key, 'consecutive_failures', 'state', 'opened_at')
local failures = tonumber(data[1]) or 0
local state = data[2] or 'closed'
local opened_at = tonumber(data[3]) or 0

if state == 'open' then
  if now - opened_at >= reset_timeout then
    state = 'half_open'
    redis.call('HSET', key, 'state', state)
    return {1, failures, state}
  else
    return {0, failures, state}
  end
end

return {1, failures, state}
"#;

/// Distributed token-bucket acquire (spec §4.7), transliterated from the
/// original `RedisTokenBucketRateLimiter` Lua script.
const RATE_LIMIT_SCRIPT: &str = r#"
local bucket_key = KEYS[1]
local config_key = KEYS[2]
local now = tonumber(ARGV[1])
local requested = tonumber(ARGV[2])
local default_requests = tonumber(ARGV[3])
local default_interval = tonumber(ARGV[4])

local bucket = redis.call('HMGET', bucket_key, 'tokens', 'last_refill', 'capacity', 'refill_rate')
local tokens = tonumber(bucket[1]) or 0
local last_refill = tonumber(bucket[2]) or now
local capacity = tonumber(bucket[3]) or 0
local refill_rate = tonumber(bucket[4]) or 0

if capacity == 0 then
  local cfg = redis.call('HMGET', config_key, 'requests', 'interval_secs')
  local requests = tonumber(cfg[1]) or default_requests
  local interval = tonumber(cfg[2]) or default_interval
  if interval <= 0 then interval = default_interval end
  capacity = requests
  refill_rate = requests / interval
  tokens = capacity
end

local elapsed = now - last_refill
if elapsed < 0 then elapsed = 0 end
tokens = math.min(capacity, tokens + elapsed * refill_rate)

if tokens >= requested then
  tokens = tokens - requested
  redis.call('HMSET', bucket_key, 'tokens', tokens, 'last_refill', now, 'capacity', capacity, 'refill_rate', refill_rate)
  redis.call('EXPIRE', bucket_key, 3600)
  return {1, tokens, capacity, refill_rate, 0}
else
  redis.call('HMSET', bucket_key, 'tokens', tokens, 'last_refill', now, 'capacity', capacity, 'refill_rate', refill_rate)
  redis.call('EXPIRE', bucket_key, 3600)
  local wait = 0
  if refill_rate > 0 then
    wait = (requested - tokens) / refill_rate
  end
  return {0, tokens, capacity, refill_rate, wait}
end
"#;

pub struct BreakerReport {
    pub consecutive_failures: u32,
    pub state: String,
    pub opened_at: f64,
}

pub struct BreakerGuard {
    pub allowed: bool,
    pub consecutive_failures: u32,
    pub state: String,
}

pub struct RateLimitOutcome {
    pub granted: bool,
    pub tokens_remaining: f64,
    pub capacity: f64,
    pub refill_rate: f64,
    pub wait_seconds: f64,
}

/// Typed wrapper over Redis. Cheap to clone (holds an internal connection manager handle).
#[derive(Clone)]
pub struct Store {
    manager: ConnectionManager,
    blocking_client: Client,
    config: RedisConfig,
}

impl Store {
    pub async fn connect(config: RedisConfig) -> CoreResult<Self> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| CoreError::Store { kind: StoreErrorKind::Protocol, message: e.to_string() })?;
        let manager = client.get_connection_manager().await?;
        let blocking_client = Client::open(config.url.as_str())
            .map_err(|e| CoreError::Store { kind: StoreErrorKind::Protocol, message: e.to_string() })?;
        Ok(Store { manager, blocking_client, config })
    }

    /// Open a dedicated connection for a blocking read (BLPOP) or a pub/sub
    /// subscription, so the shared manager is never tied up by either.
    pub async fn dedicated_connection(&self) -> CoreResult<redis::aio::Connection> {
        let conn = self.blocking_client.get_tokio_connection().await?;
        Ok(conn)
    }

    pub async fn ping(&self) -> CoreResult<()> {
        let mut conn = self.manager.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    // --- generic primitives -------------------------------------------------

    pub async fn hset_all(&self, key: &str, fields: &[(String, String)]) -> CoreResult<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut conn = self.manager.clone();
        let _: () = conn.hset_multiple(key, fields).await?;
        Ok(())
    }

    pub async fn hget_all(&self, key: &str) -> CoreResult<HashMap<String, String>> {
        let mut conn = self.manager.clone();
        let map: HashMap<String, String> = conn.hgetall(key).await?;
        Ok(map)
    }

    pub async fn hincrby(&self, key: &str, field: &str, delta: i64) -> CoreResult<i64> {
        let mut conn = self.manager.clone();
        let v: i64 = conn.hincr(key, field, delta).await?;
        Ok(v)
    }

    pub async fn lpush(&self, key: &str, value: &str) -> CoreResult<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.lpush(key, value).await?;
        Ok(())
    }

    pub async fn lrem(&self, key: &str, value: &str) -> CoreResult<i64> {
        let mut conn = self.manager.clone();
        let n: i64 = conn.lrem(key, 0, value).await?;
        Ok(n)
    }

    pub async fn lrange(&self, key: &str, start: isize, stop: isize) -> CoreResult<Vec<String>> {
        let mut conn = self.manager.clone();
        let v: Vec<String> = conn.lrange(key, start, stop).await?;
        Ok(v)
    }

    pub async fn llen(&self, key: &str) -> CoreResult<i64> {
        let mut conn = self.manager.clone();
        let n: i64 = conn.llen(key).await?;
        Ok(n)
    }

    pub async fn zadd(&self, key: &str, member: &str, score: f64) -> CoreResult<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.zadd(key, member, score).await?;
        Ok(())
    }

    pub async fn zrem(&self, key: &str, member: &str) -> CoreResult<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.zrem(key, member).await?;
        Ok(())
    }

    pub async fn zcard(&self, key: &str) -> CoreResult<i64> {
        let mut conn = self.manager.clone();
        let n: i64 = conn.zcard(key).await?;
        Ok(n)
    }

    pub async fn zrangebyscore(&self, key: &str, min: f64, max: f64) -> CoreResult<Vec<String>> {
        let mut conn = self.manager.clone();
        let v: Vec<String> = conn.zrangebyscore(key, min, max).await?;
        Ok(v)
    }

    pub async fn zscore(&self, key: &str, member: &str) -> CoreResult<Option<f64>> {
        let mut conn = self.manager.clone();
        let v: Option<f64> = conn.zscore(key, member).await?;
        Ok(v)
    }

    pub async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> CoreResult<bool> {
        let mut conn = self.manager.clone();
        let ok: bool = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs)
            .query_async::<_, Option<String>>(&mut conn)
            .await
            .map(|r| r.is_some())?;
        Ok(ok)
    }

    pub async fn setex(&self, key: &str, value: &str, ttl_secs: u64) -> CoreResult<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.set_ex(key, value, ttl_secs).await?;
        Ok(())
    }

    pub async fn get(&self, key: &str) -> CoreResult<Option<String>> {
        let mut conn = self.manager.clone();
        let v: Option<String> = conn.get(key).await?;
        Ok(v)
    }

    pub async fn del(&self, key: &str) -> CoreResult<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    pub async fn expire(&self, key: &str, ttl_secs: i64) -> CoreResult<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.expire(key, ttl_secs).await?;
        Ok(())
    }

    /// Writes a hash and bumps counters on a second hash in a single `MULTI`/`EXEC`
    /// round trip, so a state snapshot and its metrics counters never disagree.
    pub async fn pipeline_hset_and_hincr(
        &self,
        hset_key: &str,
        hset_fields: &[(String, String)],
        hset_ttl_secs: i64,
        hincr_key: &str,
        hincr_fields: &[(String, i64)],
        hincr_ttl_secs: i64,
    ) -> CoreResult<()> {
        let mut conn = self.manager.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        if !hset_fields.is_empty() {
            pipe.hset_multiple(hset_key, hset_fields).ignore();
        }
        pipe.expire(hset_key, hset_ttl_secs).ignore();
        for (field, delta) in hincr_fields {
            pipe.hincr(hincr_key, field, *delta).ignore();
        }
        pipe.expire(hincr_key, hincr_ttl_secs).ignore();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    pub async fn publish(&self, channel: &str, payload: &str) -> CoreResult<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.publish(channel, payload).await?;
        Ok(())
    }

    /// `SCAN`-based enumeration of keys matching `prefix*`. Safe for the small
    /// key counts this system expects; avoids the O(N) blocking `KEYS`.
    pub async fn scan(&self, prefix: &str) -> CoreResult<Vec<String>> {
        let mut conn = self.manager.clone();
        let pattern = format!("{prefix}*");
        let mut cursor: u64 = 0;
        let mut out = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut conn)
                .await?;
            out.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(out)
    }

    /// Blocking pop across queues in priority order. Returns `None` on timeout
    /// (spec §4.9 step 4: this doubles as the Dispatcher's liveness tick).
    pub async fn blpop(&self, queues: &[String], timeout_secs: f64) -> CoreResult<Option<(String, String)>> {
        let mut conn = self.dedicated_connection().await?;
        let result: Option<(String, String)> = conn.blpop(queues, timeout_secs).await?;
        Ok(result)
    }

    // --- atomic multi-key operations -----------------------------------------

    pub async fn create_task_atomic(&self, task_key: &str, queue_key: &str, id: &str, fields: &[(String, String)]) -> CoreResult<()> {
        let mut conn = self.manager.clone();
        let mut script = Script::new(CREATE_TASK_SCRIPT).prepare_invoke();
        script.key(task_key).key(queue_key).arg(id);
        for (k, v) in fields {
            script.arg(k).arg(v);
        }
        let _: i64 = script.invoke_async(&mut conn).await?;
        Ok(())
    }

    /// Optimistic transition: rejects (returns `false`) if the current state
    /// is not `expected`. Atomic via Lua so concurrent workers cannot race.
    pub async fn transition_atomic(&self, task_key: &str, expected_state: &str, patch: &[(String, String)]) -> CoreResult<bool> {
        let mut conn = self.manager.clone();
        let mut script = Script::new(TRANSITION_SCRIPT).prepare_invoke();
        script.key(task_key).arg(expected_state);
        for (k, v) in patch {
            script.arg(k).arg(v);
        }
        let (ok, _current): (i64, redis::Value) = script.invoke_async(&mut conn).await?;
        Ok(ok == 1)
    }

    pub async fn delete_task_atomic(&self, task_key: &str, primary: &str, retry: &str, dlq: &str, scheduled: &str, id: &str) -> CoreResult<()> {
        let mut conn = self.manager.clone();
        let _: i64 = Script::new(DELETE_TASK_SCRIPT)
            .key(task_key)
            .key(primary)
            .key(retry)
            .key(dlq)
            .key(scheduled)
            .arg(id)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    pub async fn promote_due_atomic(&self, scheduled: &str, retry: &str, now: f64, limit: i64) -> CoreResult<Vec<String>> {
        let mut conn = self.manager.clone();
        let due: Vec<String> = Script::new(PROMOTE_DUE_SCRIPT)
            .key(scheduled)
            .key(retry)
            .arg(now)
            .arg(limit)
            .invoke_async(&mut conn)
            .await?;
        Ok(due)
    }

    pub async fn breaker_report(&self, key: &str, success: bool, threshold: u32, now: f64) -> CoreResult<BreakerReport> {
        let mut conn = self.manager.clone();
        let (failures, state, opened_at): (u32, String, f64) = Script::new(BREAKER_REPORT_SCRIPT)
            .key(key)
            .arg(if success { 1 } else { 0 })
            .arg(threshold)
            .arg(now)
            .invoke_async(&mut conn)
            .await?;
        Ok(BreakerReport { consecutive_failures: failures, state, opened_at })
    }

    pub async fn breaker_guard(&self, key: &str, reset_timeout_secs: u64, now: f64) -> CoreResult<BreakerGuard> {
        let mut conn = self.manager.clone();
        let (allowed, failures, state): (i64, u32, String) = Script::new(BREAKER_GUARD_SCRIPT)
            .key(key)
            .arg(reset_timeout_secs)
            .arg(now)
            .invoke_async(&mut conn)
            .await?;
        Ok(BreakerGuard { allowed: allowed == 1, consecutive_failures: failures, state })
    }

    pub async fn breaker_force(&self, key: &str, open: bool) -> CoreResult<()> {
        let mut conn = self.manager.clone();
        if open {
            let _: () = conn
                .hset_multiple(key, &[("state", "open"), ("consecutive_failures", "999"), ("opened_at", "0")])
                .await?;
        } else {
            let _: () = conn
                .hset_multiple(key, &[("state", "closed"), ("consecutive_failures", "0"), ("opened_at", "0")])
                .await?;
        }
        Ok(())
    }

    pub async fn rate_limit_try_acquire(
        &self,
        bucket_key: &str,
        config_key: &str,
        now: f64,
        requested: f64,
        default_requests: f64,
        default_interval_secs: f64,
    ) -> CoreResult<RateLimitOutcome> {
        let mut conn = self.manager.clone();
        let (granted, tokens, capacity, refill_rate, wait): (i64, f64, f64, f64, f64) =
            Script::new(RATE_LIMIT_SCRIPT)
                .key(bucket_key)
                .key(config_key)
                .arg(now)
                .arg(requested)
                .arg(default_requests)
                .arg(default_interval_secs)
                .invoke_async(&mut conn)
                .await?;
        Ok(RateLimitOutcome {
            granted: granted == 1,
            tokens_remaining: tokens,
            capacity,
            refill_rate,
            wait_seconds: wait,
        })
    }

    pub fn config(&self) -> &RedisConfig {
        &self.config
    }
}

/// Wait `timeout` for `BLOCKING_TIMEOUT` health checks to pass, reconnecting with
/// exponential backoff. Used at process start and by the health-check loop.
pub async fn wait_for_store(config: &RedisConfig, max_attempts: u32) -> CoreResult<Store> {
    let mut attempt = 0u32;
    loop {
        match Store::connect(config.clone()).await {
            Ok(store) => match store.ping().await {
                Ok(()) => return Ok(store),
                Err(e) => {
                    warn!(error = %e, attempt, "redis ping failed during startup");
                }
            },
            Err(e) => {
                warn!(error = %e, attempt, "redis connect failed during startup");
            }
        }
        attempt += 1;
        if attempt >= max_attempts {
            return Err(CoreError::Store {
                kind: StoreErrorKind::ConnectionLost,
                message: format!("could not reach redis after {max_attempts} attempts"),
            });
        }
        let backoff = Duration::from_millis(200u64.saturating_mul(1 << attempt.min(8)));
        debug!(?backoff, "retrying redis connection");
        tokio::time::sleep(backoff).await;
    }
}
