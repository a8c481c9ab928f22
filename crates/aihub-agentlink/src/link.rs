// SPDX-License-Identifier: Apache-2.0
//!
//! The agent-side half of the bidirectional channel to the hub (§4.8).
//! Single event loop per connection: dial, register, then relay
//! `HubCommand`s down to the local [`WorkerPool`] and worker events back
//! up as `AgentFrame`s, forever reconnecting with backoff on link loss.

use std::sync::Arc;
use std::time::Duration;

use aihub_model::HostDescriptor;
use aihub_protocol::{decode_json, encode_json, AgentFrame, HubCommand};
use aihub_repo::RepoEngine;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};
use uuid::Uuid;

use crate::pool::WorkerPool;

/// Connection parameters for one agent process (§4.8 registration
/// handshake plus reconnect policy).
#[derive(Debug, Clone)]
pub struct AgentLinkConfig {
    pub hub_url: String,
    pub agent_id: Uuid,
    pub name: String,
    pub secret: String,
    pub host: HostDescriptor,
    pub heartbeat_interval: Duration,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
}

impl AgentLinkConfig {
    pub fn new(hub_url: impl Into<String>, agent_id: Uuid, name: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            hub_url: hub_url.into(),
            agent_id,
            name: name.into(),
            secret: secret.into(),
            host: HostDescriptor::default(),
            heartbeat_interval: Duration::from_secs(15),
            reconnect_base_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(30),
        }
    }
}

/// Run the agent link forever. Each disconnect is followed by a
/// reconnect after an exponentially growing delay (capped at
/// `reconnect_max_delay`); this is an unbounded retry policy, unlike the
/// bounded [`aihub_errors::retry`] engine C2 uses for single operations,
/// because a disconnected agent has nothing better to do than keep trying.
pub async fn run(cfg: AgentLinkConfig, repo_engine: Option<Arc<RepoEngine>>) {
    let pool = Arc::new(WorkerPool::new());
    let mut delay = cfg.reconnect_base_delay;
    loop {
        match connect_and_serve(&cfg, &pool, repo_engine.clone()).await {
            Ok(()) => {
                info!(agent_id = %cfg.agent_id, "agent link closed cleanly");
                delay = cfg.reconnect_base_delay;
            }
            Err(e) => {
                warn!(agent_id = %cfg.agent_id, error = %e, "agent link disconnected");
            }
        }
        warn!(delay_secs = delay.as_secs(), "reconnecting to hub");
        tokio::time::sleep(delay).await;
        delay = (delay * 2).min(cfg.reconnect_max_delay);
    }
}

async fn connect_and_serve(cfg: &AgentLinkConfig, pool: &Arc<WorkerPool>, repo_engine: Option<Arc<RepoEngine>>) -> anyhow::Result<()> {
    let (ws_stream, _response) = tokio_tungstenite::connect_async(&cfg.hub_url).await?;
    let (mut sink, mut stream) = ws_stream.split();

    let register = AgentFrame::Register {
        agent_id: cfg.agent_id,
        name: cfg.name.clone(),
        secret: cfg.secret.clone(),
        host: cfg.host.clone(),
    };
    sink.send(Message::Text(encode_json(&register)?)).await?;
    info!(agent_id = %cfg.agent_id, hub = %cfg.hub_url, "registered with hub");

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let mut heartbeat = tokio::time::interval(cfg.heartbeat_interval);
    heartbeat.tick().await; // first tick fires immediately; skip it

    loop {
        tokio::select! {
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match decode_json::<HubCommand>(&text) {
                            Ok(cmd) => pool.handle_command(cmd, repo_engine.clone(), outbound_tx.clone()).await,
                            Err(e) => warn!(error = %e, "unrecognized hub command"),
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        sink.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(()),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                }
            }
            Some((task_id, event)) = outbound_rx.recv() => {
                let frame = match event {
                    aihub_worker::WorkerOutbound::Status { state, error } => {
                        AgentFrame::WorkerStatus { task_id, state, error }
                    }
                    aihub_worker::WorkerOutbound::Event(event) => {
                        AgentFrame::WorkerEvent { task_id, event }
                    }
                };
                sink.send(Message::Text(encode_json(&frame)?)).await?;
            }
            _ = heartbeat.tick() => {
                let frame = AgentFrame::Heartbeat { ts: chrono::Utc::now() };
                sink.send(Message::Text(encode_json(&frame)?)).await?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_are_sane() {
        let cfg = AgentLinkConfig::new("ws://localhost:9000/agent", Uuid::new_v4(), "box-1", "s3cr3t");
        assert!(cfg.heartbeat_interval > Duration::from_secs(0));
        assert!(cfg.reconnect_base_delay < cfg.reconnect_max_delay);
    }
}
