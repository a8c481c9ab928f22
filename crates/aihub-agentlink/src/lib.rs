// SPDX-License-Identifier: Apache-2.0
//!
//! Agent-side transport (C8): dials the hub, performs the registration
//! handshake, and relays worker control frames and events in both
//! directions for the lifetime of the agent process.

mod link;
mod pool;

pub use link::{run, AgentLinkConfig};
pub use pool::WorkerPool;
