// SPDX-License-Identifier: Apache-2.0
//!
//! Data model (§3) and persistence contracts (C11, §4.11) for the
//! orchestration hub. These types are shared between the hub, the
//! repository engine and the wire protocol so that all three speak the
//! same vocabulary for agents, sessions, messages and repositories.

mod agent;
mod mem;
mod message;
mod pagination;
mod repository;
mod session;
mod store;

pub use agent::{Agent, AgentStatus, AiTool, HostDescriptor};
pub use mem::{MemAgentStore, MemAuditLog, MemRepositoryStore, MemSessionStore};
pub use message::{Message, MessageDirection, MessageMetadata};
pub use pagination::{Page, PageRequest};
pub use repository::{
    BranchValidation, Repository, RepositoryMetadata, RepositorySettings, RepositoryType,
    RetryAttemptRecord, TestDetails, TestResult,
};
pub use session::{Session, SessionStatus};
pub use store::{AgentFilter, AgentStore, AuditEntry, AuditLog, RepositoryFilter, RepositorySort, RepositoryStore, SessionStore, StoreError};
