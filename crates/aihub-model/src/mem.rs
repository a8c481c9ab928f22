// SPDX-License-Identifier: Apache-2.0
//!
//! In-memory reference implementations of the C11 persistence contracts.
//! Storage itself is out of scope (§1); these exist so the hub binary has
//! something to run against without requiring a real database, the way
//! `store.rs`'s own test doubles exercise the trait contract in isolation.
//! Nothing here survives a process restart.

use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::agent::Agent;
use crate::message::Message;
use crate::pagination::{Page, PageRequest};
use crate::repository::Repository;
use crate::session::Session;
use crate::store::{AgentFilter, AgentStore, AuditEntry, AuditLog, RepositoryFilter, RepositorySort, RepositoryStore, SessionStore, StoreError};

#[derive(Default)]
pub struct MemAgentStore {
    rows: Mutex<Vec<Agent>>,
}

impl MemAgentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AgentStore for MemAgentStore {
    async fn create(&self, agent: Agent) -> Result<Agent, StoreError> {
        self.rows.lock().unwrap().push(agent.clone());
        Ok(agent)
    }

    async fn get(&self, id: Uuid) -> Result<Agent, StoreError> {
        self.rows.lock().unwrap().iter().find(|a| a.id == id).cloned().ok_or(StoreError::NotFound(id))
    }

    async fn update(&self, agent: Agent) -> Result<Agent, StoreError> {
        let mut rows = self.rows.lock().unwrap();
        let slot = rows.iter_mut().find(|a| a.id == agent.id).ok_or(StoreError::NotFound(agent.id))?;
        *slot = agent.clone();
        Ok(agent)
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|a| a.id != id);
        if rows.len() == before {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn list(&self, filter: AgentFilter, page: PageRequest) -> Result<Page<Agent>, StoreError> {
        let rows = self.rows.lock().unwrap();
        let filtered: Vec<Agent> = rows.iter().filter(|a| filter.matches(a)).cloned().collect();
        Ok(Page::slice(&filtered, page))
    }
}

#[derive(Default)]
pub struct MemSessionStore {
    sessions: Mutex<Vec<Session>>,
    messages: Mutex<Vec<Message>>,
}

impl MemSessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemSessionStore {
    async fn create(&self, session: Session) -> Result<Session, StoreError> {
        self.sessions.lock().unwrap().push(session.clone());
        Ok(session)
    }

    async fn get(&self, id: Uuid) -> Result<Session, StoreError> {
        self.sessions.lock().unwrap().iter().find(|s| s.id == id).cloned().ok_or(StoreError::NotFound(id))
    }

    async fn update(&self, session: Session) -> Result<Session, StoreError> {
        let mut rows = self.sessions.lock().unwrap();
        let slot = rows.iter_mut().find(|s| s.id == session.id).ok_or(StoreError::NotFound(session.id))?;
        *slot = session.clone();
        Ok(session)
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let mut rows = self.sessions.lock().unwrap();
        let before = rows.len();
        rows.retain(|s| s.id != id);
        if rows.len() == before {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn list_by_owner(&self, owner_user_id: Uuid, page: PageRequest) -> Result<Page<Session>, StoreError> {
        let rows = self.sessions.lock().unwrap();
        let filtered: Vec<Session> = rows.iter().filter(|s| s.owner_user_id == owner_user_id).cloned().collect();
        Ok(Page::slice(&filtered, page))
    }

    async fn append_message(&self, message: Message) -> Result<Message, StoreError> {
        self.messages.lock().unwrap().push(message.clone());
        Ok(message)
    }

    async fn list_messages(&self, session_id: Uuid, page: PageRequest) -> Result<Page<Message>, StoreError> {
        let rows = self.messages.lock().unwrap();
        let mut filtered: Vec<Message> = rows.iter().filter(|m| m.session_id == session_id).cloned().collect();
        filtered.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(Page::slice(&filtered, page))
    }
}

#[derive(Default)]
pub struct MemRepositoryStore {
    rows: Mutex<Vec<Repository>>,
}

impl MemRepositoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RepositoryStore for MemRepositoryStore {
    async fn create(&self, repo: Repository) -> Result<Repository, StoreError> {
        self.rows.lock().unwrap().push(repo.clone());
        Ok(repo)
    }

    async fn get(&self, id: Uuid) -> Result<Repository, StoreError> {
        self.rows.lock().unwrap().iter().find(|r| r.id == id).cloned().ok_or(StoreError::NotFound(id))
    }

    async fn update(&self, repo: Repository) -> Result<Repository, StoreError> {
        let mut rows = self.rows.lock().unwrap();
        let slot = rows.iter_mut().find(|r| r.id == repo.id).ok_or(StoreError::NotFound(repo.id))?;
        *slot = repo.clone();
        Ok(repo)
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|r| r.id != id);
        if rows.len() == before {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn list(&self, filter: RepositoryFilter, sort: RepositorySort, page: PageRequest) -> Result<Page<Repository>, StoreError> {
        let rows = self.rows.lock().unwrap();
        let mut filtered: Vec<Repository> = rows.iter().filter(|r| filter.matches(r)).cloned().collect();
        sort.apply(&mut filtered);
        Ok(Page::slice(&filtered, page))
    }
}

#[derive(Default)]
pub struct MemAuditLog {
    rows: Mutex<Vec<AuditEntry>>,
}

impl MemAuditLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditLog for MemAuditLog {
    async fn append(&self, entry: AuditEntry) -> Result<(), StoreError> {
        self.rows.lock().unwrap().push(entry);
        Ok(())
    }

    async fn list(&self, page: PageRequest) -> Result<Page<AuditEntry>, StoreError> {
        let rows = self.rows.lock().unwrap();
        let mut all: Vec<AuditEntry> = rows.clone();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(Page::slice(&all, page))
    }
}
