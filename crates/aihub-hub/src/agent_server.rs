// SPDX-License-Identifier: Apache-2.0
//!
//! The agent link's hub-side half (C8): upgrades an agent's HTTP
//! connection to a WebSocket, verifies its `Register` handshake, then
//! bridges `AgentFrame`s in against `HubCommand`s out for the lifetime of
//! the link.

use std::net::SocketAddr;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::Response;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use aihub_protocol::{AgentFrame, HubCommand};

use crate::orchestrator::OrchestratorHandle;

pub async fn agent_ws_handler(
    ws: WebSocketUpgrade,
    State(orchestrator): State<OrchestratorHandle>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Response {
    ws.on_upgrade(move |socket| handle_agent_socket(socket, orchestrator, peer))
}

async fn handle_agent_socket(mut socket: WebSocket, orchestrator: OrchestratorHandle, peer: SocketAddr) {
    let Some((agent_id, mut cmd_rx)) = do_handshake(&mut socket, &orchestrator, peer).await else {
        let _ = socket.send(Message::Close(None)).await;
        return;
    };

    loop {
        tokio::select! {
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<AgentFrame>(&text) {
                            Ok(frame) => handle_frame(&orchestrator, agent_id, frame).await,
                            Err(e) => warn!(%peer, %agent_id, "invalid agent frame JSON: {e}"),
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(%peer, %agent_id, "agent WebSocket recv error: {e}");
                        break;
                    }
                }
            }
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(cmd) => {
                        if let Ok(json) = serde_json::to_string(&cmd) {
                            if socket.send(Message::Text(json)).await.is_err() {
                                break;
                            }
                        }
                    }
                    None => break,
                }
            }
        }
    }

    info!(%peer, %agent_id, "agent link closed");
    orchestrator.agent_disconnected(agent_id).await;
}

/// Waits for the first frame and requires it to be a valid `Register`.
/// Returns the agent's id and the receiving end of the channel the
/// orchestrator was just handed, so the caller can drain the same
/// channel its `HubCommand`s actually land on.
async fn do_handshake(
    socket: &mut WebSocket,
    orchestrator: &OrchestratorHandle,
    peer: SocketAddr,
) -> Option<(uuid::Uuid, mpsc::UnboundedReceiver<HubCommand>)> {
    let first = socket.recv().await?;
    let Ok(Message::Text(text)) = first else {
        warn!(%peer, "agent link closed before sending a register frame");
        return None;
    };
    let frame: AgentFrame = match serde_json::from_str(&text) {
        Ok(f) => f,
        Err(e) => {
            warn!(%peer, "invalid register frame JSON: {e}");
            return None;
        }
    };
    let AgentFrame::Register { agent_id, name, secret, host } = frame else {
        warn!(%peer, "first frame on agent link was not register");
        return None;
    };

    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<HubCommand>();
    if let Err(e) = orchestrator.register_agent(agent_id, name, secret, host, cmd_tx).await {
        warn!(%peer, %agent_id, error = %e, "agent registration rejected");
        return None;
    }
    Some((agent_id, cmd_rx))
}

async fn handle_frame(orchestrator: &OrchestratorHandle, agent_id: uuid::Uuid, frame: AgentFrame) {
    match frame {
        AgentFrame::Register { .. } => {
            warn!(%agent_id, "duplicate register frame on an already-registered link, ignoring");
        }
        AgentFrame::WorkerStatus { task_id, state, error } => {
            orchestrator.worker_status(agent_id, task_id, state, error).await;
        }
        AgentFrame::WorkerEvent { task_id, event } => {
            orchestrator.worker_event(agent_id, task_id, event).await;
        }
        AgentFrame::Heartbeat { .. } => {
            orchestrator.agent_heartbeat(agent_id).await;
        }
    }
}
