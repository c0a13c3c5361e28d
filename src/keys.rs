//! The byte-exact Redis key layout from spec §6.

pub const PRIMARY_QUEUE: &str = "tasks:pending:primary";
pub const RETRY_QUEUE: &str = "tasks:pending:retry";
pub const SCHEDULED_ZSET: &str = "tasks:scheduled";
pub const DLQ_LIST: &str = "dlq:tasks";
pub const EVENT_CHANNEL: &str = "queue-updates";
pub const PROVIDER_STATE_KEY: &str = "openrouter:state";
pub const PROVIDER_STATE_LOCK_KEY: &str = "openrouter:state:lock";
pub const RATE_LIMIT_BUCKET_KEY: &str = "openrouter:rate_limit:bucket";
pub const RATE_LIMIT_CONFIG_KEY: &str = "openrouter:rate_limit_config";

pub fn task_key(id: &str) -> String {
    format!("task:{id}")
}

pub fn dlq_task_key(id: &str) -> String {
    format!("dlq:task:{id}")
}

pub fn worker_heartbeat_key(worker_id: &str) -> String {
    format!("worker:heartbeat:{worker_id}")
}

pub fn metrics_key(date: &str) -> String {
    format!("openrouter:metrics:{date}")
}

pub fn control_plane_command_channel(command: &str) -> String {
    format!("control-plane:{command}")
}

pub fn control_plane_reply_channel(worker_id: &str) -> String {
    format!("control-plane:reply:{worker_id}")
}
