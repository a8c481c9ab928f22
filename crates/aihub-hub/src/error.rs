// SPDX-License-Identifier: Apache-2.0
use aihub_model::{AiTool, StoreError};
use thiserror::Error;
use uuid::Uuid;

/// Failures surfaced at the orchestrator's boundary (§4.9, §4.10, C11).
#[derive(Debug, Error)]
pub enum HubError {
    /// Assignment policy found no eligible agent (§4.9 `no_agent`).
    #[error("no agent available for tool {0}")]
    NoAgent(AiTool),

    #[error("session not found: {0}")]
    SessionNotFound(Uuid),

    /// A client tried to open or act on a session it does not own (§4.10).
    #[error("session {session_id} is not owned by this client")]
    NotOwner { session_id: Uuid },

    #[error("agent secret mismatch for agent {0}")]
    BadSecret(Uuid),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Repo(#[from] aihub_repo::EngineError),

    /// The orchestrator's command loop has shut down.
    #[error("orchestrator is no longer running")]
    Gone,
}
