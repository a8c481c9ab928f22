// SPDX-License-Identifier: Apache-2.0
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// An AI CLI an agent can drive. The set is closed in the sense that the
/// hub only ever routes to a tool it knows — new tools are added here,
/// not inferred from free text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiTool {
    Claude,
    Cursor,
    QwCoder,
}

impl std::fmt::Display for AiTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AiTool::Claude => write!(f, "claude"),
            AiTool::Cursor => write!(f, "cursor"),
            AiTool::QwCoder => write!(f, "qwcoder"),
        }
    }
}

/// Lifecycle status of an agent (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Pending,
    Connected,
    Offline,
}

/// Host platform/resources reported at registration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostDescriptor {
    pub platform: String,
    /// Free-form resource info (cpu count, memory, etc.) — the hub does
    /// not interpret this beyond display.
    #[serde(default)]
    pub resources: Value,
}

/// A remote process that exposes a host's local CLI tools to the hub (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: Uuid,
    pub name: String,
    /// Registration secret, verified on the handshake (§4.8). Never
    /// serialized back out to a non-owning caller — callers that only
    /// need to display the agent should go through [`Agent::redacted`].
    pub secret: String,
    pub max_workers: u32,
    pub status: AgentStatus,
    pub host: HostDescriptor,
    pub tags: Vec<String>,
    pub allowed_tools: Vec<AiTool>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub last_validated: Option<DateTime<Utc>>,
}

impl Agent {
    pub fn new(name: impl Into<String>, secret: impl Into<String>, max_workers: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            secret: secret.into(),
            max_workers,
            status: AgentStatus::Pending,
            host: HostDescriptor::default(),
            tags: Vec::new(),
            allowed_tools: Vec::new(),
            last_heartbeat: None,
            last_validated: None,
        }
    }

    /// Whether this agent is eligible to take on a new worker for `tool`,
    /// given its currently reported `live_workers` count (§4.9 assignment
    /// policy).
    pub fn can_accept(&self, tool: AiTool, live_workers: u32) -> bool {
        self.status == AgentStatus::Connected
            && self.allowed_tools.contains(&tool)
            && live_workers < self.max_workers
    }

    /// A copy with the registration secret scrubbed, safe to hand to any
    /// caller outside the handshake path (§3 invariant: secrets are never
    /// returned verbatim).
    pub fn redacted(&self) -> Agent {
        Agent {
            secret: "*****".to_string(),
            ..self.clone()
        }
    }
}
