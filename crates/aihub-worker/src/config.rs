// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use aihub_protocol::RepoCloneSpec;
use thiserror::Error;

/// Parameters for starting one worker (§4.7 `cfg`). `working_directory` is
/// a starting point only: when `repo_clone_spec` is set, the engine's
/// materialized workspace path replaces it before the CLI is spawned.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// CLI identifier, e.g. `"claude"`, `"cursor"`. Not the closed
    /// [`aihub_model::AiTool`] set: the wire protocol carries this as a
    /// raw string so a new CLI can be wired up without touching the enum.
    pub tool: String,
    pub working_directory: PathBuf,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub resume_id: Option<String>,
    pub initial_prompt: Option<String>,
    pub repo_clone_spec: Option<RepoCloneSpec>,
}

impl WorkerConfig {
    pub fn new(tool: impl Into<String>, working_directory: PathBuf) -> Self {
        Self {
            tool: tool.into(),
            working_directory,
            model: None,
            max_tokens: None,
            temperature: None,
            api_key: None,
            base_url: None,
            resume_id: None,
            initial_prompt: None,
            repo_clone_spec: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker is already started")]
    AlreadyStarted,
    #[error("worker is not running")]
    NotRunning,
    #[error("a repository clone was requested but no repository engine was configured")]
    NoRepoEngine,
    #[error("failed to materialize workspace: {0}")]
    Workspace(#[from] aihub_repo::EngineError),
    #[error("unknown CLI tool: {0}")]
    UnknownTool(String),
    #[error("failed to spawn child process: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("i/o error talking to child process: {0}")]
    Io(#[from] std::io::Error),
}
