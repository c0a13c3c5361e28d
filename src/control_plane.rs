//! Layer C14 — broadcast remote control over pub-sub (spec §4.14).
//!
//! Grounded on Celery's `Panel.register` remote-control pattern, reimplemented over
//! Redis pub/sub request/reply since there is no Celery broker here: the caller
//! publishes a command on `control-plane:{command}`, every live worker subscribes
//! and replies on its own `control-plane:reply:{worker_id}` channel, and the caller
//! aggregates replies until a bounded timeout elapses.

use crate::circuit_breaker::CircuitBreaker;
use crate::error::CoreResult;
use crate::keys::{control_plane_command_channel, control_plane_reply_channel};
use crate::store::Store;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Health,
    OpenBreaker,
    CloseBreaker,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Health => "health",
            Command::OpenBreaker => "open_breaker",
            Command::CloseBreaker => "close_breaker",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    pub worker_id: String,
    pub ok: bool,
    pub detail: String,
}

/// Worker-side listener: subscribes to every command channel this worker knows
/// about and replies on its own dedicated channel.
pub struct ControlPlane {
    store: Store,
    worker_id: String,
    breaker: Arc<CircuitBreaker>,
}

impl ControlPlane {
    pub fn new(store: Store, worker_id: String, breaker: Arc<CircuitBreaker>) -> Self {
        ControlPlane { store, worker_id, breaker }
    }

    pub async fn run(&self) -> CoreResult<()> {
        let mut pubsub = self.store.dedicated_connection().await?.into_pubsub();
        for command in [Command::Health, Command::OpenBreaker, Command::CloseBreaker] {
            pubsub.subscribe(control_plane_command_channel(command.as_str())).await?;
        }

        let mut stream = pubsub.on_message();
        while let Some(msg) = stream.next().await {
            let channel: String = msg.get_channel_name().to_string();
            let reply = self.handle(&channel).await;
            let payload = serde_json::to_string(&reply)?;
            self.store
                .publish(&control_plane_reply_channel(&self.worker_id), &payload)
                .await?;
        }
        Ok(())
    }

    async fn handle(&self, channel: &str) -> Reply {
        let ok_detail = |detail: &str| Reply { worker_id: self.worker_id.clone(), ok: true, detail: detail.to_string() };
        let err_detail = |e: crate::error::CoreError| Reply { worker_id: self.worker_id.clone(), ok: false, detail: e.to_string() };

        if channel.ends_with(Command::Health.as_str()) {
            ok_detail("alive")
        } else if channel.ends_with(Command::OpenBreaker.as_str()) {
            match self.breaker.force_open().await {
                Ok(()) => ok_detail("breaker opened"),
                Err(e) => err_detail(e),
            }
        } else if channel.ends_with(Command::CloseBreaker.as_str()) {
            match self.breaker.force_close().await {
                Ok(()) => ok_detail("breaker closed"),
                Err(e) => err_detail(e),
            }
        } else {
            Reply { worker_id: self.worker_id.clone(), ok: false, detail: format!("unknown command channel: {channel}") }
        }
    }
}

/// Caller side: publish a command and collect replies until `timeout` elapses.
/// Workers that never reply are simply absent from the result, not reported
/// with a synthetic error (spec §4.14: "missing replies reported unknown").
pub async fn broadcast(store: &Store, command: Command, timeout: Duration) -> CoreResult<Vec<Reply>> {
    let mut pubsub = store.dedicated_connection().await?.into_pubsub();
    pubsub.psubscribe("control-plane:reply:*").await?;
    store.publish(&control_plane_command_channel(command.as_str()), "{}").await?;

    let mut replies = Vec::new();
    let mut seen: HashMap<String, ()> = HashMap::new();
    let deadline = tokio::time::Instant::now() + timeout;
    let mut stream = pubsub.on_message();
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        match tokio::time::timeout(remaining, stream.next()).await {
            Ok(Some(msg)) => {
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(_) => continue,
                };
                if let Ok(reply) = serde_json::from_str::<Reply>(&payload) {
                    if seen.insert(reply.worker_id.clone(), ()).is_none() {
                        replies.push(reply);
                    }
                }
            }
            Ok(None) => break,
            Err(_) => break,
        }
    }
    info!(command = command.as_str(), replies = replies.len(), "control plane broadcast complete");
    Ok(replies)
}
