// SPDX-License-Identifier: Apache-2.0
//!
//! The client link's hub-side half (C10): upgrades a browser's HTTP
//! connection to a WebSocket, bridges `ClientCommand`s in against
//! `ClientEvent`s out, and fans in both the session the browser has open
//! and the roster-wide agent-connect/disconnect stream.
//!
//! Ownership (§4.10): the owning `userId` comes from the connection
//! itself — real authentication is external to this crate (§1, §6) — and
//! every session-scoped command is checked against it by the
//! orchestrator, never trusted from the payload.

use std::net::SocketAddr;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Path, State};
use axum::response::Response;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use aihub_protocol::{ClientCommand, ClientEvent};

use crate::orchestrator::OrchestratorHandle;

pub async fn client_ws_handler(
    ws: WebSocketUpgrade,
    State(orchestrator): State<OrchestratorHandle>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path(owner_user_id): Path<Uuid>,
) -> Response {
    ws.on_upgrade(move |socket| handle_client_socket(socket, orchestrator, peer, owner_user_id))
}

async fn handle_client_socket(mut socket: WebSocket, orchestrator: OrchestratorHandle, peer: SocketAddr, owner_user_id: Uuid) {
    info!(%peer, %owner_user_id, "client connected");

    // One sink per link; `session:open` points the orchestrator's
    // per-session subscriber map at it, `session:open` for a different
    // session just repoints the same sink (a browser drives one session
    // tab per link in this implementation).
    let (sink, mut sink_rx) = mpsc::unbounded_channel::<ClientEvent>();
    let mut agent_events = orchestrator.subscribe_agent_events();
    let mut open_session: Option<Uuid> = None;

    loop {
        tokio::select! {
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientCommand>(&text) {
                            Ok(cmd) => {
                                if let Some(new_session) = handle_command(&orchestrator, owner_user_id, cmd, &sink, &mut socket).await {
                                    open_session = Some(new_session);
                                }
                            }
                            Err(e) => {
                                warn!(%peer, "invalid client command JSON: {e}");
                                send_event(&mut socket, &ClientEvent::Error { session_id: None, message: format!("invalid JSON: {e}") }).await;
                            }
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
                        debug!(%peer, "client WebSocket recv error: {e}");
                        break;
                    }
                }
            }
            event = sink_rx.recv() => {
                match event {
                    Some(ev) => send_event(&mut socket, &ev).await,
                    None => break,
                }
            }
            event = agent_events.recv() => {
                match event {
                    Ok(ev) => send_event(&mut socket, &ev).await,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(%peer, "client lagged by {n} agent roster events");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    if let Some(session_id) = open_session {
        orchestrator.close_session(session_id).await;
    }
    info!(%peer, %owner_user_id, "client disconnected");
}

/// Dispatch one command, returning the session id this link should now be
/// considered subscribed to (if it changed).
async fn handle_command(
    orchestrator: &OrchestratorHandle,
    owner_user_id: Uuid,
    cmd: ClientCommand,
    sink: &mpsc::UnboundedSender<ClientEvent>,
    socket: &mut WebSocket,
) -> Option<Uuid> {
    match cmd {
        ClientCommand::SessionOpen { session_id } => match orchestrator.open_session(session_id, owner_user_id, sink.clone()).await {
            Ok(messages) => {
                send_event(socket, &ClientEvent::SessionSnapshot { session_id, messages }).await;
                Some(session_id)
            }
            Err(e) => {
                send_event(socket, &ClientEvent::Error { session_id: Some(session_id), message: e.to_string() }).await;
                None
            }
        },
        ClientCommand::SessionInput { session_id, text } => {
            if let Err(e) = orchestrator.session_input(session_id, owner_user_id, text).await {
                send_event(socket, &ClientEvent::Error { session_id: Some(session_id), message: e.to_string() }).await;
            }
            None
        }
        ClientCommand::SessionCancel { session_id } => {
            if let Err(e) = orchestrator.session_cancel(session_id, owner_user_id).await {
                send_event(socket, &ClientEvent::Error { session_id: Some(session_id), message: e.to_string() }).await;
            }
            None
        }
        ClientCommand::AgentList => {
            let agents = orchestrator.list_agents().await;
            send_event(socket, &ClientEvent::AgentList { agents }).await;
            None
        }
    }
}

async fn send_event(socket: &mut WebSocket, ev: &ClientEvent) {
    if let Ok(json) = serde_json::to_string(ev) {
        let _ = socket.send(Message::Text(json)).await;
    }
}
