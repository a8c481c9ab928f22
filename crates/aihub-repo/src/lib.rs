// SPDX-License-Identifier: Apache-2.0
//!
//! Branch resolution (C3), repository connection testing and workspace
//! materialization (C4), and the credential vault (C5).

mod branch;
mod engine;
mod vault;

pub use branch::{default_branch, optimal_branch, parse_remote_refs, validate, BranchCheck, OptimalBranch};
pub use engine::{BranchesResult, EngineError, RepoEngine};
pub use vault::{Vault, VaultError};
