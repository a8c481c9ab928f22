// SPDX-License-Identifier: Apache-2.0
//!
//! The orchestration hub: the Session Orchestrator (C9), the hub-side
//! halves of the Agent Link (C8) and Client Link (C10), and the axum
//! surface that serves both.

mod agent_server;
mod client_server;
mod credentials;
mod error;
mod orchestrator;
mod registry;
mod server;

pub use credentials::{CredentialResolver, StaticCredentialResolver};
pub use error::HubError;
pub use orchestrator::{Orchestrator, OrchestratorHandle};
pub use registry::AgentRegistry;
pub use server::{router, serve};
