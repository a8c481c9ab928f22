// SPDX-License-Identifier: Apache-2.0
//!
//! Wire protocol for the bidirectional channel between a single agent
//! process and the hub (C8). [`HubCommand`] flows hub → agent;
//! [`AgentFrame`] flows agent → hub, including the registration handshake
//! itself.

use aihub_model::HostDescriptor;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cli_event::CliEvent;

/// Where to obtain a working copy before a worker starts, carried on
/// `worker:start` when the task needs a fresh clone (§4.7 `repoCloneSpec`).
///
/// The agent has no access to the repository store (§4.11 keeps storage
/// hub-side only), so the hub looks up `credential_id` and forwards the
/// stored ciphertext as-is in `secret`; the agent's own `RepoEngine`
/// decrypts it locally with the same server-wide vault key (distributed
/// to every agent at deployment, §4.5) right before cloning. The
/// plaintext credential itself is never present on the wire.
/// `credential_id` is additionally carried for audit/display purposes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoCloneSpec {
    pub url: String,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub credential_id: Option<Uuid>,
    #[serde(default)]
    pub secret: Option<String>,
}

/// Commands the hub sends to a connected agent to control its workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubCommand {
    /// Spawn a worker for `task_id` (§4.7, §4.8).
    WorkerStart {
        task_id: Uuid,
        session_id: Uuid,
        tool: String,
        working_directory: String,
        #[serde(default)]
        model: Option<String>,
        #[serde(default)]
        initial_prompt: Option<String>,
        /// The CLI's own resume token, carried through from the session
        /// when resuming on a (possibly different) agent.
        #[serde(default)]
        resume_id: Option<String>,
        #[serde(default)]
        repo: Option<RepoCloneSpec>,
    },

    WorkerInput { task_id: Uuid, content: String },

    WorkerStop { task_id: Uuid },
}

/// The lifecycle state a worker reports in a `worker:status` frame (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
    Error,
}

/// Frames an agent sends to the hub: the registration handshake plus the
/// ongoing event stream for its workers (§4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentFrame {
    /// Sent once, immediately after connecting. The hub verifies `secret`
    /// against the stored agent record and closes the link on mismatch.
    Register {
        agent_id: Uuid,
        name: String,
        secret: String,
        host: HostDescriptor,
    },

    WorkerStatus {
        task_id: Uuid,
        state: WorkerState,
        #[serde(default)]
        error: Option<String>,
    },

    WorkerEvent { task_id: Uuid, event: CliEvent },

    Heartbeat { ts: chrono::DateTime<chrono::Utc> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hub_command_tags_are_snake_case() {
        let cmd = HubCommand::WorkerStop { task_id: Uuid::nil() };
        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.contains("\"type\":\"worker_stop\""));
    }

    #[test]
    fn register_round_trips_through_json() {
        let frame = AgentFrame::Register {
            agent_id: Uuid::new_v4(),
            name: "box-1".to_string(),
            secret: "s3cr3t".to_string(),
            host: HostDescriptor::default(),
        };
        let json = serde_json::to_string(&frame).unwrap();
        let back: AgentFrame = serde_json::from_str(&json).unwrap();
        match back {
            AgentFrame::Register { name, .. } => assert_eq!(name, "box-1"),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn worker_event_carries_cli_event_payload() {
        let frame = AgentFrame::WorkerEvent {
            task_id: Uuid::new_v4(),
            event: crate::cli_event::parse_line(r#"{"type":"text","delta":"hi"}"#),
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"delta\":\"hi\""));
    }

    #[test]
    fn worker_status_error_defaults_to_none() {
        let frame: AgentFrame = serde_json::from_str(
            r#"{"type":"worker_status","task_id":"00000000-0000-0000-0000-000000000000","state":"running"}"#,
        )
        .unwrap();
        match frame {
            AgentFrame::WorkerStatus { error, state, .. } => {
                assert!(error.is_none());
                assert_eq!(state, WorkerState::Running);
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }
}
