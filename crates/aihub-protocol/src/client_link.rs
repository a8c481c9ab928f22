// SPDX-License-Identifier: Apache-2.0
//!
//! Wire protocol for the per-user channel between a browser and the hub
//! (C10). [`ClientCommand`] flows client → hub; [`ClientEvent`] flows
//! hub → client.

use aihub_model::{Agent, Message, SessionStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cli_event::CliEvent;

/// Control messages a browser sends over its client link (§4.10).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Subscribe to an existing session. The hub replies with a
    /// `session:snapshot` (last N messages) and then switches to live
    /// `session:event`s.
    SessionOpen { session_id: Uuid },

    SessionInput { session_id: Uuid, text: String },

    SessionCancel { session_id: Uuid },

    /// Request the current agent roster (redacted, §3 invariant).
    AgentList,
}

/// Events and replies the hub pushes to a browser over its client link
/// (§4.10).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Replay of the last `limit` messages, sent once on `session:open`
    /// before the hub switches to live events.
    SessionSnapshot {
        session_id: Uuid,
        messages: Vec<Message>,
    },

    /// A live event forwarded from the session's worker (§4.9 fan-out).
    SessionEvent { session_id: Uuid, event: CliEvent },

    SessionStatus {
        session_id: Uuid,
        status: SessionStatus,
    },

    AgentList { agents: Vec<Agent> },

    AgentConnected { agent_id: Uuid },

    AgentDisconnected { agent_id: Uuid },

    /// A client-facing error: ownership violation, unknown session,
    /// `no_agent` from the assignment policy, etc.
    Error {
        session_id: Option<Uuid>,
        message: String,
    },
}
