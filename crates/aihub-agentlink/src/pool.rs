// SPDX-License-Identifier: Apache-2.0
//!
//! Tracks the live [`WorkerRuntime`]s on this agent, keyed by `taskId`.
//! Isolation between concurrent workers (§4.7) is already provided by
//! `WorkerRuntime` itself (separate working directory, separate process
//! group); this pool only provides the lookup and forwards each worker's
//! events into one shared channel tagged with its `taskId`.

use std::collections::HashMap;
use std::sync::Arc;

use aihub_protocol::HubCommand;
use aihub_repo::RepoEngine;
use aihub_worker::{WorkerConfig, WorkerOutbound, WorkerRuntime};
use tokio::sync::{mpsc, Mutex};
use tracing::warn;
use uuid::Uuid;

/// One worker event tagged with the task it belongs to, ready to become
/// an `AgentFrame::WorkerStatus` / `AgentFrame::WorkerEvent` frame.
pub type TaggedOutbound = (Uuid, WorkerOutbound);

#[derive(Default)]
pub struct WorkerPool {
    workers: Mutex<HashMap<Uuid, WorkerRuntime>>,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle a `worker:start` command: spawn a fresh [`WorkerRuntime`]
    /// and wire its events into `outbound_tx`, tagged by `task_id`.
    pub async fn handle_start(
        &self,
        task_id: Uuid,
        cfg: WorkerConfig,
        repo_engine: Option<Arc<RepoEngine>>,
        credential_blob: Option<String>,
        outbound_tx: mpsc::UnboundedSender<TaggedOutbound>,
    ) {
        let runtime = WorkerRuntime::new(task_id);
        self.workers.lock().await.insert(task_id, runtime.clone());

        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if outbound_tx.send((task_id, event)).is_err() {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            let engine_ref = repo_engine.as_deref();
            if let Err(e) = runtime.start(cfg, engine_ref, credential_blob.as_deref(), tx).await {
                warn!(%task_id, error = %e, "worker failed to start");
            }
        });
    }

    pub async fn handle_input(&self, task_id: Uuid, content: &str) {
        let runtime = self.workers.lock().await.get(&task_id).cloned();
        match runtime {
            Some(runtime) => {
                if let Err(e) = runtime.input(content).await {
                    warn!(%task_id, error = %e, "failed to write worker input");
                }
            }
            None => warn!(%task_id, "worker:input for unknown task"),
        }
    }

    pub async fn handle_stop(&self, task_id: Uuid) {
        let runtime = self.workers.lock().await.get(&task_id).cloned();
        match runtime {
            Some(runtime) => {
                tokio::spawn(async move {
                    let _ = runtime.stop(aihub_worker::DEFAULT_GRACE).await;
                });
            }
            None => warn!(%task_id, "worker:stop for unknown task"),
        }
    }

    /// Dispatch one control frame from the hub to this pool.
    pub async fn handle_command(
        &self,
        cmd: HubCommand,
        repo_engine: Option<Arc<RepoEngine>>,
        outbound_tx: mpsc::UnboundedSender<TaggedOutbound>,
    ) {
        match cmd {
            HubCommand::WorkerStart {
                task_id,
                tool,
                working_directory,
                model,
                initial_prompt,
                resume_id,
                repo,
                session_id: _,
            } => {
                let credential_blob = repo.as_ref().and_then(|spec| spec.secret.clone());
                let mut cfg = WorkerConfig::new(tool, std::path::PathBuf::from(working_directory));
                cfg.model = model;
                cfg.initial_prompt = initial_prompt;
                cfg.resume_id = resume_id;
                cfg.repo_clone_spec = repo;
                self.handle_start(task_id, cfg, repo_engine, credential_blob, outbound_tx).await;
            }
            HubCommand::WorkerInput { task_id, content } => {
                self.handle_input(task_id, &content).await;
            }
            HubCommand::WorkerStop { task_id } => {
                self.handle_stop(task_id).await;
            }
        }
    }
}
