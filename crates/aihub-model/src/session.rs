// SPDX-License-Identifier: Apache-2.0
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::agent::AiTool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Paused,
    Completed,
    Archived,
}

/// The user-facing unit of work pairing a repository with an AI tool (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub owner_user_id: Uuid,
    pub display_name: String,
    pub ai_tool: AiTool,
    pub status: SessionStatus,
    pub repository_id: Uuid,
    pub agent_id: Option<Uuid>,
    pub worker_id: Option<Uuid>,
    /// The AI CLI's own opaque resume token — never interpreted by the hub.
    pub external_session_id: Option<String>,
    pub message_count: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub last_activity: DateTime<Utc>,
    /// Free-form metadata: model, branch, preferences (§3).
    #[serde(default)]
    pub metadata: Value,
}

impl Session {
    pub fn new(owner_user_id: Uuid, display_name: impl Into<String>, ai_tool: AiTool, repository_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_user_id,
            display_name: display_name.into(),
            ai_tool,
            status: SessionStatus::Active,
            repository_id,
            agent_id: None,
            worker_id: None,
            external_session_id: None,
            message_count: 0,
            total_tokens: 0,
            total_cost: 0.0,
            last_activity: Utc::now(),
            metadata: Value::Null,
        }
    }

    /// Whether this session can be resumed on a (possibly different) agent
    /// without a live worker, because it carries a resume token (§3, §8).
    pub fn is_resumable(&self) -> bool {
        self.external_session_id.is_some()
    }

    /// §8 invariant: every active session either has a live worker binding
    /// or carries a resume token.
    pub fn satisfies_active_invariant(&self) -> bool {
        if self.status != SessionStatus::Active {
            return true;
        }
        self.worker_id.is_some() || self.is_resumable()
    }

    pub fn attach_worker(&mut self, agent_id: Uuid, worker_id: Uuid) {
        self.agent_id = Some(agent_id);
        self.worker_id = Some(worker_id);
        self.status = SessionStatus::Active;
        self.last_activity = Utc::now();
    }

    /// Detach the worker binding, e.g. on clean stop or disconnect (§4.8, §4.9).
    /// The resume token (if any) survives so the session stays resumable.
    pub fn detach_worker(&mut self, new_status: SessionStatus) {
        self.agent_id = None;
        self.worker_id = None;
        self.status = new_status;
        self.last_activity = Utc::now();
    }

    pub fn record_usage(&mut self, tokens: u64, cost: f64) {
        self.total_tokens += tokens;
        self.total_cost += cost;
        self.last_activity = Utc::now();
    }

    pub fn bump_message_count(&mut self) {
        self.message_count += 1;
        self.last_activity = Utc::now();
    }

    pub fn set_external_session_id(&mut self, id: impl Into<String>) {
        self.external_session_id = Some(id.into());
    }
}
