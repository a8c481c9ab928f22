// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::agent::{Agent, AgentStatus, AiTool};
use crate::message::Message;
use crate::pagination::{Page, PageRequest};
use crate::repository::{Repository, RepositoryType};
use crate::session::Session;

/// Persistence-layer failures (C11). Deliberately narrow: stores report
/// *what* failed to find or save, never *how* their backend is wired.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(Uuid),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("store backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentFilter {
    #[serde(default)]
    pub status: Option<AgentStatus>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub tool: Option<AiTool>,
}

impl AgentFilter {
    pub fn matches(&self, agent: &Agent) -> bool {
        if let Some(status) = self.status {
            if agent.status != status {
                return false;
            }
        }
        if let Some(tag) = &self.tag {
            if !agent.tags.iter().any(|t| t == tag) {
                return false;
            }
        }
        if let Some(tool) = self.tool {
            if !agent.allowed_tools.contains(&tool) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepositoryFilter {
    #[serde(default)]
    pub owner_user_id: Option<Uuid>,
    #[serde(default)]
    pub repo_type: Option<RepositoryType>,
    #[serde(default)]
    pub name_contains: Option<String>,
}

impl RepositoryFilter {
    pub fn matches(&self, repo: &Repository) -> bool {
        if let Some(owner) = self.owner_user_id {
            if repo.owner_user_id != owner {
                return false;
            }
        }
        if let Some(repo_type) = self.repo_type {
            if repo.repo_type != repo_type {
                return false;
            }
        }
        if let Some(needle) = &self.name_contains {
            if !repo.name.to_lowercase().contains(&needle.to_lowercase()) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepositorySort {
    NameAsc,
    NameDesc,
    UpdatedAtDesc,
    CreatedAtDesc,
}

impl RepositorySort {
    pub fn apply(self, repos: &mut [Repository]) {
        match self {
            RepositorySort::NameAsc => repos.sort_by(|a, b| a.name.cmp(&b.name)),
            RepositorySort::NameDesc => repos.sort_by(|a, b| b.name.cmp(&a.name)),
            RepositorySort::UpdatedAtDesc => repos.sort_by(|a, b| b.updated_at.cmp(&a.updated_at)),
            RepositorySort::CreatedAtDesc => repos.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        }
    }
}

/// One append-only audit record (§4.11).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub actor_user_id: Option<Uuid>,
    pub action: String,
    pub target: Option<String>,
    #[serde(default)]
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(actor_user_id: Option<Uuid>, action: impl Into<String>, target: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            actor_user_id,
            action: action.into(),
            target,
            metadata: Value::Null,
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait AgentStore: Send + Sync {
    async fn create(&self, agent: Agent) -> Result<Agent, StoreError>;
    async fn get(&self, id: Uuid) -> Result<Agent, StoreError>;
    async fn update(&self, agent: Agent) -> Result<Agent, StoreError>;
    async fn delete(&self, id: Uuid) -> Result<(), StoreError>;
    async fn list(&self, filter: AgentFilter, page: PageRequest) -> Result<Page<Agent>, StoreError>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, session: Session) -> Result<Session, StoreError>;
    async fn get(&self, id: Uuid) -> Result<Session, StoreError>;
    async fn update(&self, session: Session) -> Result<Session, StoreError>;
    async fn delete(&self, id: Uuid) -> Result<(), StoreError>;
    async fn list_by_owner(&self, owner_user_id: Uuid, page: PageRequest) -> Result<Page<Session>, StoreError>;

    /// Append one entry to a session's message log (§4.11). Ordering
    /// within a session is the store's responsibility; callers only ever
    /// append for a given `session_id` from the orchestrator's single
    /// event loop, so no compare-and-swap is needed here.
    async fn append_message(&self, message: Message) -> Result<Message, StoreError>;

    /// Most recent messages first within the page, oldest within a page
    /// last — callers asking for page 1 get the latest activity (§4.9
    /// replay-on-open uses this to fetch the last 50 without tracking a
    /// separate "latest" cursor).
    async fn list_messages(&self, session_id: Uuid, page: PageRequest) -> Result<Page<Message>, StoreError>;
}

#[async_trait]
pub trait RepositoryStore: Send + Sync {
    async fn create(&self, repo: Repository) -> Result<Repository, StoreError>;
    async fn get(&self, id: Uuid) -> Result<Repository, StoreError>;
    async fn update(&self, repo: Repository) -> Result<Repository, StoreError>;
    async fn delete(&self, id: Uuid) -> Result<(), StoreError>;
    async fn list(&self, filter: RepositoryFilter, sort: RepositorySort, page: PageRequest) -> Result<Page<Repository>, StoreError>;
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append(&self, entry: AuditEntry) -> Result<(), StoreError>;
    async fn list(&self, page: PageRequest) -> Result<Page<AuditEntry>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentStatus;
    use tokio::sync::Mutex;

    /// Minimal in-memory double, just enough to exercise the trait contract
    /// end to end (dyn-compatibility, filter/sort/page composition).
    struct MemAgentStore {
        rows: Mutex<Vec<Agent>>,
    }

    #[async_trait]
    impl AgentStore for MemAgentStore {
        async fn create(&self, agent: Agent) -> Result<Agent, StoreError> {
            self.rows.lock().await.push(agent.clone());
            Ok(agent)
        }

        async fn get(&self, id: Uuid) -> Result<Agent, StoreError> {
            self.rows
                .lock()
                .await
                .iter()
                .find(|a| a.id == id)
                .cloned()
                .ok_or(StoreError::NotFound(id))
        }

        async fn update(&self, agent: Agent) -> Result<Agent, StoreError> {
            let mut rows = self.rows.lock().await;
            let slot = rows.iter_mut().find(|a| a.id == agent.id).ok_or(StoreError::NotFound(agent.id))?;
            *slot = agent.clone();
            Ok(agent)
        }

        async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
            let mut rows = self.rows.lock().await;
            let before = rows.len();
            rows.retain(|a| a.id != id);
            if rows.len() == before {
                return Err(StoreError::NotFound(id));
            }
            Ok(())
        }

        async fn list(&self, filter: AgentFilter, page: PageRequest) -> Result<Page<Agent>, StoreError> {
            let rows = self.rows.lock().await;
            let filtered: Vec<Agent> = rows.iter().filter(|a| filter.matches(a)).cloned().collect();
            Ok(Page::slice(&filtered, page))
        }
    }

    #[tokio::test]
    async fn agent_store_round_trip_through_trait_object() {
        let store: Box<dyn AgentStore> = Box::new(MemAgentStore { rows: Mutex::new(Vec::new()) });

        let mut agent = Agent::new("box-1", "secret", 2);
        agent.status = AgentStatus::Connected;
        agent.allowed_tools.push(AiTool::Claude);
        let created = store.create(agent.clone()).await.unwrap();
        assert_eq!(created.id, agent.id);

        let fetched = store.get(agent.id).await.unwrap();
        assert_eq!(fetched.name, "box-1");

        let filter = AgentFilter {
            status: Some(AgentStatus::Connected),
            tool: Some(AiTool::Claude),
            ..Default::default()
        };
        let page = store.list(filter, PageRequest::default()).await.unwrap();
        assert_eq!(page.total, 1);

        store.delete(agent.id).await.unwrap();
        assert!(matches!(store.get(agent.id).await, Err(StoreError::NotFound(_))));
    }

    #[test]
    fn repository_sort_orders_by_name() {
        let mut repos = vec![
            Repository::new(Uuid::new_v4(), "zebra", "u", crate::repository::RepositoryType::Git),
            Repository::new(Uuid::new_v4(), "alpha", "u", crate::repository::RepositoryType::Git),
        ];
        RepositorySort::NameAsc.apply(&mut repos);
        assert_eq!(repos[0].name, "alpha");
        assert_eq!(repos[1].name, "zebra");
    }

    #[test]
    fn repository_filter_matches_on_name_substring_case_insensitive() {
        let repo = Repository::new(Uuid::new_v4(), "My-Repo", "u", crate::repository::RepositoryType::Git);
        let filter = RepositoryFilter {
            name_contains: Some("repo".to_string()),
            ..Default::default()
        };
        assert!(filter.matches(&repo));
    }
}
