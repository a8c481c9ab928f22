// SPDX-License-Identifier: Apache-2.0
//!
//! Agent-side worker runtime (C7): owns one child CLI process per task,
//! drives it through `idle → starting → running → stopping →
//! stopped|error`, and streams its parsed output upward.

mod command;
mod config;
mod runtime;

pub use config::{WorkerConfig, WorkerError};
pub use runtime::{WorkerOutbound, WorkerRuntime, WorkerStatus, DEFAULT_GRACE};
