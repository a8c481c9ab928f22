// SPDX-License-Identifier: Apache-2.0
//!
//! HTTP/WebSocket surface: wires the agent link (C8) and client link
//! (C10) handlers onto an [`OrchestratorHandle`] and serves both over one
//! axum [`Router`].

use std::net::SocketAddr;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::agent_server::agent_ws_handler;
use crate::client_server::client_ws_handler;
use crate::orchestrator::OrchestratorHandle;

pub fn router(orchestrator: OrchestratorHandle) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/ws/agent", get(agent_ws_handler))
        .route("/ws/client/:owner_user_id", get(client_ws_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(orchestrator)
}

async fn healthz() -> &'static str {
    "ok"
}

/// Binds and serves the hub's HTTP surface until the process is killed.
pub async fn serve(addr: SocketAddr, orchestrator: OrchestratorHandle) -> anyhow::Result<()> {
    let app = router(orchestrator);
    info!(%addr, "hub listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}
