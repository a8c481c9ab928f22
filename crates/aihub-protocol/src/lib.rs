// SPDX-License-Identifier: Apache-2.0
//!
//! Wire protocol types for the orchestration hub: the CLI Stream Parser's
//! event vocabulary (C6), the Agent Link frames (C8) and the Client Link
//! frames (C10), plus a JSON/CBOR dual codec shared by both links.

mod agent_link;
mod client_link;
mod cli_event;
mod codec;

pub use agent_link::{AgentFrame, HubCommand, RepoCloneSpec, WorkerState};
pub use client_link::{ClientCommand, ClientEvent};
pub use cli_event::{parse_line, CliEvent, Usage};
pub use codec::{decode_cbor, decode_json, encode_cbor, encode_json};
