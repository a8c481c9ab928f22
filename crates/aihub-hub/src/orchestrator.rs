// SPDX-License-Identifier: Apache-2.0
//!
//! The Session Orchestrator (C9): a single long-lived task owning the
//! agent registry, the live-worker index and the per-session client
//! subscriber map. Every mutation flows through its command channel and
//! is processed one at a time, so the maps never need their own lock —
//! the same shape as `ControlService`/`AgentHandle`, generalized from one
//! agent and many operators to many agents and many independently-owned
//! sessions (§5).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use aihub_model::{
    Agent, AgentStatus, AiTool, AuditEntry, AuditLog, HostDescriptor, Message, MessageDirection, PageRequest, Repository,
    RepositoryStore, RepositoryType, Session, SessionStatus, SessionStore, StoreError,
};
use aihub_model::AgentStore;
use aihub_protocol::{CliEvent, ClientEvent, HubCommand, RepoCloneSpec, WorkerState};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::credentials::CredentialResolver;
use crate::error::HubError;
use crate::registry::AgentRegistry;

/// A worker currently bound to a session, indexed by `taskId` == `workerId`
/// (§4.9 "map taskId -> session via the live-worker index").
struct LiveWorker {
    session_id: Uuid,
    agent_id: Uuid,
    /// Set once a terminal `result` event has been seen, so a following
    /// `worker:status{stopped}` is recognized as a natural completion
    /// rather than a cancellation or a crash (§4.9 termination rule).
    saw_result: bool,
}

enum OrchCmd {
    RegisterAgent {
        agent_id: Uuid,
        name: String,
        secret: String,
        host: HostDescriptor,
        cmd_tx: mpsc::UnboundedSender<HubCommand>,
        reply: oneshot::Sender<Result<(), HubError>>,
    },
    AgentDisconnected {
        agent_id: Uuid,
    },
    AgentOfflineTimeout {
        agent_id: Uuid,
    },
    AgentHeartbeat {
        agent_id: Uuid,
    },
    WorkerStatus {
        agent_id: Uuid,
        task_id: Uuid,
        state: WorkerState,
        error: Option<String>,
    },
    WorkerEvent {
        agent_id: Uuid,
        task_id: Uuid,
        event: CliEvent,
    },
    ForceStopTimeout {
        task_id: Uuid,
    },
    ClientOpen {
        session_id: Uuid,
        owner_user_id: Uuid,
        sink: mpsc::UnboundedSender<ClientEvent>,
        reply: oneshot::Sender<Result<Vec<Message>, HubError>>,
    },
    ClientClose {
        session_id: Uuid,
    },
    ClientInput {
        session_id: Uuid,
        owner_user_id: Uuid,
        text: String,
        reply: oneshot::Sender<Result<(), HubError>>,
    },
    ClientCancel {
        session_id: Uuid,
        owner_user_id: Uuid,
        reply: oneshot::Sender<Result<(), HubError>>,
    },
    ListAgents {
        reply: oneshot::Sender<Vec<Agent>>,
    },
}

/// Cheap-to-clone handle to a running [`Orchestrator`]. Every public
/// method enqueues one command and, where a caller needs an answer,
/// awaits a oneshot reply — the same request/response idiom
/// `AgentHandle::send` uses.
#[derive(Clone)]
pub struct OrchestratorHandle {
    tx: mpsc::Sender<OrchCmd>,
    agent_events: broadcast::Sender<ClientEvent>,
}

impl OrchestratorHandle {
    /// Build agent roster change notifications a client link can
    /// subscribe to independent of any one session (§4.10 `agent:list`
    /// counterparts `agent:connected`/`agent:disconnected`).
    pub fn subscribe_agent_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.agent_events.subscribe()
    }

    pub async fn register_agent(
        &self,
        agent_id: Uuid,
        name: String,
        secret: String,
        host: HostDescriptor,
        cmd_tx: mpsc::UnboundedSender<HubCommand>,
    ) -> Result<(), HubError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(OrchCmd::RegisterAgent { agent_id, name, secret, host, cmd_tx, reply })
            .await
            .map_err(|_| HubError::Gone)?;
        rx.await.map_err(|_| HubError::Gone)?
    }

    pub async fn agent_disconnected(&self, agent_id: Uuid) {
        let _ = self.tx.send(OrchCmd::AgentDisconnected { agent_id }).await;
    }

    pub async fn agent_heartbeat(&self, agent_id: Uuid) {
        let _ = self.tx.send(OrchCmd::AgentHeartbeat { agent_id }).await;
    }

    pub async fn worker_status(&self, agent_id: Uuid, task_id: Uuid, state: WorkerState, error: Option<String>) {
        let _ = self.tx.send(OrchCmd::WorkerStatus { agent_id, task_id, state, error }).await;
    }

    pub async fn worker_event(&self, agent_id: Uuid, task_id: Uuid, event: CliEvent) {
        let _ = self.tx.send(OrchCmd::WorkerEvent { agent_id, task_id, event }).await;
    }

    /// `session:open` (§4.10): subscribes `sink` to live events for this
    /// session, starting/resuming its worker if none is live, and returns
    /// the replay snapshot.
    pub async fn open_session(
        &self,
        session_id: Uuid,
        owner_user_id: Uuid,
        sink: mpsc::UnboundedSender<ClientEvent>,
    ) -> Result<Vec<Message>, HubError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(OrchCmd::ClientOpen { session_id, owner_user_id, sink, reply })
            .await
            .map_err(|_| HubError::Gone)?;
        rx.await.map_err(|_| HubError::Gone)?
    }

    pub async fn close_session(&self, session_id: Uuid) {
        let _ = self.tx.send(OrchCmd::ClientClose { session_id }).await;
    }

    pub async fn session_input(&self, session_id: Uuid, owner_user_id: Uuid, text: String) -> Result<(), HubError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(OrchCmd::ClientInput { session_id, owner_user_id, text, reply })
            .await
            .map_err(|_| HubError::Gone)?;
        rx.await.map_err(|_| HubError::Gone)?
    }

    pub async fn session_cancel(&self, session_id: Uuid, owner_user_id: Uuid) -> Result<(), HubError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(OrchCmd::ClientCancel { session_id, owner_user_id, reply })
            .await
            .map_err(|_| HubError::Gone)?;
        rx.await.map_err(|_| HubError::Gone)?
    }

    pub async fn list_agents(&self) -> Vec<Agent> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(OrchCmd::ListAgents { reply }).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }
}

pub struct Orchestrator {
    cmd_rx: mpsc::Receiver<OrchCmd>,
    self_tx: mpsc::Sender<OrchCmd>,
    agent_events: broadcast::Sender<ClientEvent>,
    agents: AgentRegistry,
    live_workers: HashMap<Uuid, LiveWorker>,
    client_subscribers: HashMap<Uuid, mpsc::UnboundedSender<ClientEvent>>,
    pending_cancels: HashMap<Uuid, JoinHandle<()>>,
    pending_agent_offline: HashMap<Uuid, JoinHandle<()>>,
    agent_store: Arc<dyn AgentStore>,
    session_store: Arc<dyn SessionStore>,
    repository_store: Arc<dyn RepositoryStore>,
    audit_log: Option<Arc<dyn AuditLog>>,
    credentials: Arc<dyn CredentialResolver>,
    replay_limit: u32,
    cancel_grace: Duration,
    agent_offline_grace: Duration,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        agent_store: Arc<dyn AgentStore>,
        session_store: Arc<dyn SessionStore>,
        repository_store: Arc<dyn RepositoryStore>,
        audit_log: Option<Arc<dyn AuditLog>>,
        credentials: Arc<dyn CredentialResolver>,
    ) -> (OrchestratorHandle, Self) {
        let (tx, cmd_rx) = mpsc::channel(256);
        let (agent_events, _) = broadcast::channel(256);
        let handle = OrchestratorHandle {
            tx: tx.clone(),
            agent_events: agent_events.clone(),
        };
        let orchestrator = Self {
            cmd_rx,
            self_tx: tx,
            agent_events,
            agents: AgentRegistry::new(),
            live_workers: HashMap::new(),
            client_subscribers: HashMap::new(),
            pending_cancels: HashMap::new(),
            pending_agent_offline: HashMap::new(),
            agent_store,
            session_store,
            repository_store,
            audit_log,
            credentials,
            replay_limit: 50,
            cancel_grace: Duration::from_secs(5),
            agent_offline_grace: Duration::from_secs(30),
        };
        (handle, orchestrator)
    }

    #[cfg(test)]
    fn with_grace_periods(mut self, cancel_grace: Duration, agent_offline_grace: Duration) -> Self {
        self.cancel_grace = cancel_grace;
        self.agent_offline_grace = agent_offline_grace;
        self
    }

    /// Drive the command loop until every [`OrchestratorHandle`] clone has
    /// been dropped. Intended to run for the lifetime of the process in
    /// its own `tokio::spawn`.
    pub async fn run(mut self) {
        while let Some(cmd) = self.cmd_rx.recv().await {
            self.dispatch(cmd).await;
        }
        info!("orchestrator command channel closed, loop ending");
    }

    async fn dispatch(&mut self, cmd: OrchCmd) {
        match cmd {
            OrchCmd::RegisterAgent { agent_id, name, secret, host, cmd_tx, reply } => {
                let result = self.handle_register(agent_id, name, secret, host, cmd_tx).await;
                let _ = reply.send(result);
            }
            OrchCmd::AgentDisconnected { agent_id } => self.handle_agent_disconnected(agent_id).await,
            OrchCmd::AgentOfflineTimeout { agent_id } => self.handle_agent_offline_timeout(agent_id).await,
            OrchCmd::AgentHeartbeat { agent_id } => {
                if let Some(c) = self.agents.get(agent_id) {
                    let mut agent = c.agent.clone();
                    agent.last_heartbeat = Some(chrono::Utc::now());
                    if let Err(e) = self.agent_store.update(agent).await {
                        warn!(%agent_id, error = %e, "failed to persist heartbeat");
                    }
                }
            }
            OrchCmd::WorkerStatus { agent_id, task_id, state, error } => {
                self.handle_worker_status(agent_id, task_id, state, error).await
            }
            OrchCmd::WorkerEvent { agent_id, task_id, event } => self.handle_worker_event(agent_id, task_id, event).await,
            OrchCmd::ForceStopTimeout { task_id } => self.handle_force_stop_timeout(task_id).await,
            OrchCmd::ClientOpen { session_id, owner_user_id, sink, reply } => {
                let result = self.handle_client_open(session_id, owner_user_id, sink).await;
                let _ = reply.send(result);
            }
            OrchCmd::ClientClose { session_id } => {
                self.client_subscribers.remove(&session_id);
            }
            OrchCmd::ClientInput { session_id, owner_user_id, text, reply } => {
                let result = self.handle_client_input(session_id, owner_user_id, text).await;
                let _ = reply.send(result);
            }
            OrchCmd::ClientCancel { session_id, owner_user_id, reply } => {
                let result = self.handle_client_cancel(session_id, owner_user_id).await;
                let _ = reply.send(result);
            }
            OrchCmd::ListAgents { reply } => {
                let agents = self.agents.snapshot().iter().map(Agent::redacted).collect();
                let _ = reply.send(agents);
            }
        }
    }

    // ── Agent lifecycle ──────────────────────────────────────────────────────

    async fn handle_register(
        &mut self,
        agent_id: Uuid,
        name: String,
        secret: String,
        host: HostDescriptor,
        cmd_tx: mpsc::UnboundedSender<HubCommand>,
    ) -> Result<(), HubError> {
        let mut agent = match self.agent_store.get(agent_id).await {
            Ok(a) => a,
            Err(StoreError::NotFound(_)) => return Err(HubError::BadSecret(agent_id)),
            Err(e) => return Err(e.into()),
        };
        if agent.secret != secret {
            warn!(%agent_id, "agent registration rejected: secret mismatch");
            return Err(HubError::BadSecret(agent_id));
        }

        if let Some(handle) = self.pending_agent_offline.remove(&agent_id) {
            handle.abort();
        }

        agent.name = name;
        agent.host = host;
        agent.status = AgentStatus::Connected;
        agent.last_heartbeat = Some(chrono::Utc::now());
        agent.last_validated = Some(chrono::Utc::now());
        let agent = self.agent_store.update(agent).await?;
        info!(%agent_id, name = %agent.name, "agent connected");
        self.agents.connect(agent.clone(), cmd_tx);
        self.audit("agent.connect", Some(agent_id.to_string())).await;
        let _ = self.agent_events.send(ClientEvent::AgentConnected { agent_id });
        Ok(())
    }

    async fn handle_agent_disconnected(&mut self, agent_id: Uuid) {
        if self.agents.disconnect(agent_id).is_none() {
            return;
        }
        info!(%agent_id, grace_secs = self.agent_offline_grace.as_secs(), "agent link lost, starting offline grace period");
        let tx = self.self_tx.clone();
        let grace = self.agent_offline_grace;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let _ = tx.send(OrchCmd::AgentOfflineTimeout { agent_id }).await;
        });
        self.pending_agent_offline.insert(agent_id, handle);
    }

    async fn handle_agent_offline_timeout(&mut self, agent_id: Uuid) {
        if self.pending_agent_offline.remove(&agent_id).is_none() {
            // Reconnected (or already handled) before the grace period elapsed.
            return;
        }
        if let Ok(mut agent) = self.agent_store.get(agent_id).await {
            agent.status = AgentStatus::Offline;
            if let Err(e) = self.agent_store.update(agent).await {
                warn!(%agent_id, error = %e, "failed to mark agent offline");
            }
        }

        let orphaned: Vec<Uuid> = self
            .live_workers
            .iter()
            .filter(|(_, w)| w.agent_id == agent_id)
            .map(|(task_id, _)| *task_id)
            .collect();
        for task_id in orphaned {
            self.cancel_forced_stop_timer(task_id);
            self.end_worker(task_id, None).await;
        }

        warn!(%agent_id, "agent marked offline, live workers paused");
        self.audit("agent.offline", Some(agent_id.to_string())).await;
        let _ = self.agent_events.send(ClientEvent::AgentDisconnected { agent_id });
    }

    // ── Worker event fan-out (§4.9) ──────────────────────────────────────────

    async fn handle_worker_status(&mut self, agent_id: Uuid, task_id: Uuid, state: WorkerState, error: Option<String>) {
        match state {
            WorkerState::Idle | WorkerState::Starting | WorkerState::Running | WorkerState::Stopping => {}
            WorkerState::Stopped | WorkerState::Error => {
                let live_agent = self.live_workers.get(&task_id).map(|w| w.agent_id);
                if live_agent != Some(agent_id) {
                    warn!(%task_id, %agent_id, "worker:status from unexpected agent, ignoring");
                    return;
                }
                self.cancel_forced_stop_timer(task_id);
                self.end_worker(task_id, error).await;
            }
        }
    }

    /// Tear down a finished worker and transition its session (§4.9
    /// "Session termination"): `stopped` -> paused (or `completed` if a
    /// terminal `result` event was already seen), `error` -> `active` with
    /// no worker when the session can be resumed, `paused` otherwise.
    async fn end_worker(&mut self, task_id: Uuid, error: Option<String>) {
        let Some(live) = self.live_workers.remove(&task_id) else {
            return;
        };
        self.agents.mark_worker_stopped(live.agent_id);

        match self.get_session(live.session_id).await {
            Ok(mut session) => {
                let new_status = if error.is_some() {
                    if session.is_resumable() {
                        SessionStatus::Active
                    } else {
                        SessionStatus::Paused
                    }
                } else if live.saw_result {
                    SessionStatus::Completed
                } else {
                    SessionStatus::Paused
                };
                session.detach_worker(new_status);
                if let Err(e) = self.session_store.update(session).await {
                    warn!(session_id = %live.session_id, error = %e, "failed to persist session after worker end");
                }
                if let Some(msg) = &error {
                    self.audit("worker.error", Some(task_id.to_string())).await;
                    warn!(session_id = %live.session_id, %task_id, error = %msg, "worker ended with error");
                }
                self.notify_session_status(live.session_id, new_status);
            }
            Err(e) => warn!(session_id = %live.session_id, error = %e, "session vanished while its worker was ending"),
        }
    }

    async fn handle_worker_event(&mut self, agent_id: Uuid, task_id: Uuid, event: CliEvent) {
        let session_id = match self.live_workers.get(&task_id) {
            Some(live) if live.agent_id == agent_id => live.session_id,
            Some(_) => {
                warn!(%task_id, %agent_id, "worker:event from unexpected agent, ignoring");
                return;
            }
            None => {
                warn!(%task_id, "worker:event for unmapped task, dropping");
                return;
            }
        };

        if matches!(event, CliEvent::Result { .. }) {
            if let Some(live) = self.live_workers.get_mut(&task_id) {
                live.saw_result = true;
            }
        }

        let log_entry = message_for_log(&event);
        let external_id = external_session_id(&event);
        let terminal = terminal_usage(&event);

        if log_entry.is_some() || external_id.is_some() || terminal.is_some() {
            match self.get_session(session_id).await {
                Ok(mut session) => {
                    if let Some((direction, content, usage)) = log_entry {
                        let mut message = Message::new(session_id, direction, content);
                        if let Some(u) = &usage {
                            message.metadata.input_tokens = u.input_tokens.map(|v| v as u32);
                            message.metadata.output_tokens = u.output_tokens.map(|v| v as u32);
                            message.metadata.cost_usd = u.cost_usd;
                        }
                        if let Err(e) = self.session_store.append_message(message).await {
                            warn!(%session_id, error = %e, "failed to append message");
                        }
                        session.bump_message_count();
                        if let Some(u) = &usage {
                            let tokens = u.input_tokens.unwrap_or(0) + u.output_tokens.unwrap_or(0);
                            session.record_usage(tokens, u.cost_usd.unwrap_or(0.0));
                        }
                    }
                    if let Some(u) = &terminal {
                        let tokens = u.input_tokens.unwrap_or(0) + u.output_tokens.unwrap_or(0);
                        session.record_usage(tokens, u.cost_usd.unwrap_or(0.0));
                    }
                    if let Some(ext_id) = external_id {
                        session.set_external_session_id(ext_id);
                    }
                    if let Err(e) = self.session_store.update(session).await {
                        warn!(%session_id, error = %e, "failed to persist session after worker event");
                    }
                }
                Err(e) => warn!(%session_id, error = %e, "session vanished mid-stream"),
            }
        }

        if let Some(sink) = self.client_subscribers.get(&session_id) {
            let _ = sink.send(ClientEvent::SessionEvent { session_id, event });
        }
    }

    async fn handle_force_stop_timeout(&mut self, task_id: Uuid) {
        if self.pending_cancels.remove(&task_id).is_none() {
            // Already confirmed stopped before the timer fired.
            return;
        }
        if self.live_workers.contains_key(&task_id) {
            warn!(%task_id, "agent did not confirm worker:stop within grace period, forcing it closed hub-side");
            self.end_worker(task_id, None).await;
        }
    }

    fn cancel_forced_stop_timer(&mut self, task_id: Uuid) {
        if let Some(handle) = self.pending_cancels.remove(&task_id) {
            handle.abort();
        }
    }

    // ── Client link (§4.10) ──────────────────────────────────────────────────

    async fn handle_client_open(
        &mut self,
        session_id: Uuid,
        owner_user_id: Uuid,
        sink: mpsc::UnboundedSender<ClientEvent>,
    ) -> Result<Vec<Message>, HubError> {
        let mut session = self.get_session(session_id).await?;
        if session.owner_user_id != owner_user_id {
            return Err(HubError::NotOwner { session_id });
        }
        self.client_subscribers.insert(session_id, sink);

        let needs_worker = session.worker_id.is_none()
            && matches!(session.status, SessionStatus::Active | SessionStatus::Paused);
        if needs_worker {
            self.start_or_resume(&mut session).await?;
        }

        let page = self
            .session_store
            .list_messages(session_id, PageRequest { page: 1, limit: self.replay_limit })
            .await?;
        Ok(page.items)
    }

    async fn handle_client_input(&mut self, session_id: Uuid, owner_user_id: Uuid, text: String) -> Result<(), HubError> {
        let mut session = self.get_session(session_id).await?;
        if session.owner_user_id != owner_user_id {
            return Err(HubError::NotOwner { session_id });
        }
        let worker_id = session.worker_id.ok_or(HubError::NoAgent(session.ai_tool))?;
        let agent_id = session.agent_id.ok_or(HubError::NoAgent(session.ai_tool))?;
        let cmd_tx = self.agents.cmd_tx(agent_id).ok_or(HubError::NoAgent(session.ai_tool))?;
        cmd_tx
            .send(HubCommand::WorkerInput { task_id: worker_id, content: text.clone() })
            .map_err(|_| HubError::NoAgent(session.ai_tool))?;

        let message = Message::new(session_id, MessageDirection::User, text);
        if let Err(e) = self.session_store.append_message(message).await {
            warn!(%session_id, error = %e, "failed to append user message");
        }
        session.bump_message_count();
        self.session_store.update(session).await?;
        Ok(())
    }

    async fn handle_client_cancel(&mut self, session_id: Uuid, owner_user_id: Uuid) -> Result<(), HubError> {
        let mut session = self.get_session(session_id).await?;
        if session.owner_user_id != owner_user_id {
            return Err(HubError::NotOwner { session_id });
        }

        let (Some(worker_id), Some(agent_id)) = (session.worker_id, session.agent_id) else {
            session.status = SessionStatus::Paused;
            self.session_store.update(session).await?;
            self.notify_session_status(session_id, SessionStatus::Paused);
            return Ok(());
        };

        let cmd_tx = self.agents.cmd_tx(agent_id).ok_or(HubError::NoAgent(session.ai_tool))?;
        cmd_tx
            .send(HubCommand::WorkerStop { task_id: worker_id })
            .map_err(|_| HubError::NoAgent(session.ai_tool))?;

        session.status = SessionStatus::Paused;
        self.session_store.update(session).await?;
        self.notify_session_status(session_id, SessionStatus::Paused);

        let tx = self.self_tx.clone();
        let grace = self.cancel_grace;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let _ = tx.send(OrchCmd::ForceStopTimeout { task_id: worker_id }).await;
        });
        self.pending_cancels.insert(worker_id, handle);
        Ok(())
    }

    // ── Assignment policy / start / resume (§4.9) ────────────────────────────

    async fn start_or_resume(&mut self, session: &mut Session) -> Result<(), HubError> {
        let agent_id = self.agents.pick_agent(session.ai_tool).ok_or(HubError::NoAgent(session.ai_tool))?;
        let worker_id = Uuid::new_v4();
        let repo = self.repository_store.get(session.repository_id).await?;

        let (working_directory, repo_spec) = self.build_clone_spec(&repo, worker_id).await?;

        let cmd = HubCommand::WorkerStart {
            task_id: worker_id,
            session_id: session.id,
            tool: session.ai_tool.to_string(),
            working_directory,
            model: session.metadata.get("model").and_then(|v| v.as_str()).map(str::to_string),
            initial_prompt: None,
            resume_id: session.external_session_id.clone(),
            repo: repo_spec,
        };

        let cmd_tx = self.agents.cmd_tx(agent_id).ok_or(HubError::NoAgent(session.ai_tool))?;
        cmd_tx.send(cmd).map_err(|_| HubError::NoAgent(session.ai_tool))?;

        self.agents.mark_worker_started(agent_id);
        session.attach_worker(agent_id, worker_id);
        self.session_store.update(session.clone()).await?;
        self.live_workers.insert(worker_id, LiveWorker { session_id: session.id, agent_id, saw_result: false });
        info!(session_id = %session.id, %agent_id, %worker_id, resumed = session.is_resumable(), "session worker started");
        self.audit("session.start", Some(session.id.to_string())).await;
        Ok(())
    }

    async fn build_clone_spec(&self, repo: &Repository, worker_id: Uuid) -> Result<(String, Option<RepoCloneSpec>), HubError> {
        match repo.repo_type {
            RepositoryType::Git => {
                let secret = match repo.credential_id {
                    Some(credential_id) => self.credentials.resolve(credential_id).await,
                    None => None,
                };
                let spec = RepoCloneSpec {
                    url: repo.url.clone(),
                    branch: repo.requested_branch.clone(),
                    credential_id: repo.credential_id,
                    secret,
                };
                Ok((format!("workspaces/workspace-{worker_id}"), Some(spec)))
            }
            RepositoryType::Local => Ok((repo.url.clone(), None)),
            RepositoryType::Svn => Err(HubError::Repo(aihub_repo::EngineError::Unsupported("svn".to_string()))),
        }
    }

    // ── Helpers ───────────────────────────────────────────────────────────────

    async fn get_session(&self, id: Uuid) -> Result<Session, HubError> {
        self.session_store.get(id).await.map_err(|e| match e {
            StoreError::NotFound(_) => HubError::SessionNotFound(id),
            other => HubError::Store(other),
        })
    }

    fn notify_session_status(&self, session_id: Uuid, status: SessionStatus) {
        if let Some(sink) = self.client_subscribers.get(&session_id) {
            let _ = sink.send(ClientEvent::SessionStatus { session_id, status });
        }
    }

    async fn audit(&self, action: &str, target: Option<String>) {
        if let Some(log) = &self.audit_log {
            let entry = AuditEntry::new(None, action, target);
            if let Err(e) = log.append(entry).await {
                warn!(%action, error = %e, "failed to append audit entry");
            }
        }
    }
}

/// Which C6 events are appended to the session's message log, and what
/// they carry (§4.9 step 2). Only user-visible content is logged;
/// `toolUse`/`toolResult`/`system`/`unknown` are internal bookkeeping.
fn message_for_log(event: &CliEvent) -> Option<(MessageDirection, String, Option<aihub_protocol::Usage>)> {
    match event {
        CliEvent::Text { delta } if !delta.is_empty() => Some((MessageDirection::Assistant, delta.clone(), None)),
        CliEvent::Assistant { message, usage } => Some((MessageDirection::Assistant, message.clone(), usage.clone())),
        CliEvent::Error { message } => Some((MessageDirection::System, message.clone(), None)),
        _ => None,
    }
}

/// The terminal `result` event's usage/cost, which accumulates onto the
/// session even though the event itself is never appended as a logged
/// message (§8 scenario 1 pins `messageCount` to the assistant reply
/// alone, not the result that follows it).
fn terminal_usage(event: &CliEvent) -> Option<aihub_protocol::Usage> {
    match event {
        CliEvent::Result { usage, cost_usd, .. } => {
            let mut usage = usage.clone();
            usage.cost_usd = Some(*cost_usd);
            Some(usage)
        }
        _ => None,
    }
}

/// §4.9 step 3 names `event.type = assistant` as the carrier of a fresh
/// `externalSessionId`, but C6's `assistant` variant has no metadata field
/// for one (it is only `{message, usage}`). `system` is the only variant
/// with a free-form payload, so that's where a CLI's resume token
/// actually surfaces in this implementation — see DESIGN.md.
fn external_session_id(event: &CliEvent) -> Option<String> {
    match event {
        CliEvent::System { fields, .. } => fields
            .get("sessionId")
            .or_else(|| fields.get("session_id"))
            .and_then(|v| v.as_str())
            .map(str::to_string),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aihub_model::{AgentFilter, Page, RepositoryFilter, RepositorySort};
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    // ── In-memory store doubles, just enough to exercise the orchestrator ────

    #[derive(Default)]
    struct MemStores {
        agents: StdMutex<HashMap<Uuid, Agent>>,
        sessions: StdMutex<HashMap<Uuid, Session>>,
        messages: StdMutex<Vec<Message>>,
        repos: StdMutex<HashMap<Uuid, Repository>>,
    }

    struct MemAgentStore(Arc<MemStores>);
    struct MemSessionStore(Arc<MemStores>);
    struct MemRepoStore(Arc<MemStores>);

    #[async_trait]
    impl AgentStore for MemAgentStore {
        async fn create(&self, agent: Agent) -> Result<Agent, StoreError> {
            self.0.agents.lock().unwrap().insert(agent.id, agent.clone());
            Ok(agent)
        }
        async fn get(&self, id: Uuid) -> Result<Agent, StoreError> {
            self.0.agents.lock().unwrap().get(&id).cloned().ok_or(StoreError::NotFound(id))
        }
        async fn update(&self, agent: Agent) -> Result<Agent, StoreError> {
            self.0.agents.lock().unwrap().insert(agent.id, agent.clone());
            Ok(agent)
        }
        async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
            self.0.agents.lock().unwrap().remove(&id).map(|_| ()).ok_or(StoreError::NotFound(id))
        }
        async fn list(&self, filter: AgentFilter, page: PageRequest) -> Result<Page<Agent>, StoreError> {
            let rows: Vec<Agent> = self.0.agents.lock().unwrap().values().filter(|a| filter.matches(a)).cloned().collect();
            Ok(Page::slice(&rows, page))
        }
    }

    #[async_trait]
    impl SessionStore for MemSessionStore {
        async fn create(&self, session: Session) -> Result<Session, StoreError> {
            self.0.sessions.lock().unwrap().insert(session.id, session.clone());
            Ok(session)
        }
        async fn get(&self, id: Uuid) -> Result<Session, StoreError> {
            self.0.sessions.lock().unwrap().get(&id).cloned().ok_or(StoreError::NotFound(id))
        }
        async fn update(&self, session: Session) -> Result<Session, StoreError> {
            self.0.sessions.lock().unwrap().insert(session.id, session.clone());
            Ok(session)
        }
        async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
            self.0.sessions.lock().unwrap().remove(&id).map(|_| ()).ok_or(StoreError::NotFound(id))
        }
        async fn list_by_owner(&self, owner_user_id: Uuid, page: PageRequest) -> Result<Page<Session>, StoreError> {
            let rows: Vec<Session> = self
                .0
                .sessions
                .lock()
                .unwrap()
                .values()
                .filter(|s| s.owner_user_id == owner_user_id)
                .cloned()
                .collect();
            Ok(Page::slice(&rows, page))
        }
        async fn append_message(&self, message: Message) -> Result<Message, StoreError> {
            self.0.messages.lock().unwrap().push(message.clone());
            Ok(message)
        }
        async fn list_messages(&self, session_id: Uuid, page: PageRequest) -> Result<Page<Message>, StoreError> {
            let mut rows: Vec<Message> = self
                .0
                .messages
                .lock()
                .unwrap()
                .iter()
                .filter(|m| m.session_id == session_id)
                .cloned()
                .collect();
            rows.reverse();
            Ok(Page::slice(&rows, page))
        }
    }

    #[async_trait]
    impl RepositoryStore for MemRepoStore {
        async fn create(&self, repo: Repository) -> Result<Repository, StoreError> {
            self.0.repos.lock().unwrap().insert(repo.id, repo.clone());
            Ok(repo)
        }
        async fn get(&self, id: Uuid) -> Result<Repository, StoreError> {
            self.0.repos.lock().unwrap().get(&id).cloned().ok_or(StoreError::NotFound(id))
        }
        async fn update(&self, repo: Repository) -> Result<Repository, StoreError> {
            self.0.repos.lock().unwrap().insert(repo.id, repo.clone());
            Ok(repo)
        }
        async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
            self.0.repos.lock().unwrap().remove(&id).map(|_| ()).ok_or(StoreError::NotFound(id))
        }
        async fn list(&self, filter: RepositoryFilter, sort: RepositorySort, page: PageRequest) -> Result<Page<Repository>, StoreError> {
            let mut rows: Vec<Repository> = self.0.repos.lock().unwrap().values().filter(|r| filter.matches(r)).cloned().collect();
            sort.apply(&mut rows);
            Ok(Page::slice(&rows, page))
        }
    }

    struct NoCredentials;
    #[async_trait]
    impl CredentialResolver for NoCredentials {
        async fn resolve(&self, _credential_id: Uuid) -> Option<String> {
            None
        }
    }

    fn test_rig() -> (OrchestratorHandle, Arc<MemStores>, Uuid, Uuid) {
        let stores = Arc::new(MemStores::default());
        let agent_store: Arc<dyn AgentStore> = Arc::new(MemAgentStore(stores.clone()));
        let session_store: Arc<dyn SessionStore> = Arc::new(MemSessionStore(stores.clone()));
        let repo_store: Arc<dyn RepositoryStore> = Arc::new(MemRepoStore(stores.clone()));
        let (handle, orchestrator) = Orchestrator::new(agent_store, session_store, repo_store, None, Arc::new(NoCredentials));
        let orchestrator = orchestrator.with_grace_periods(Duration::from_millis(50), Duration::from_millis(50));
        tokio::spawn(orchestrator.run());

        let owner = Uuid::new_v4();
        let repo = Repository::new(owner, "demo", "/tmp/demo", RepositoryType::Local);
        let repo_id = repo.id;
        stores.repos.lock().unwrap().insert(repo.id, repo);
        (handle, stores, owner, repo_id)
    }

    async fn register_test_agent(handle: &OrchestratorHandle, stores: &Arc<MemStores>, tool: AiTool) -> (Uuid, mpsc::UnboundedReceiver<HubCommand>) {
        let mut agent = Agent::new("box-1", "s3cr3t", 4);
        agent.allowed_tools.push(tool);
        let agent_id = agent.id;
        stores.agents.lock().unwrap().insert(agent_id, agent);

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        handle
            .register_agent(agent_id, "box-1".to_string(), "s3cr3t".to_string(), HostDescriptor::default(), cmd_tx)
            .await
            .unwrap();
        (agent_id, cmd_rx)
    }

    // ── Registration ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn register_rejects_wrong_secret() {
        let (handle, stores, _owner, _repo) = test_rig();
        let agent = Agent::new("box-1", "correct", 2);
        let agent_id = agent.id;
        stores.agents.lock().unwrap().insert(agent_id, agent);

        let (cmd_tx, _rx) = mpsc::unbounded_channel();
        let result = handle
            .register_agent(agent_id, "box-1".to_string(), "wrong".to_string(), HostDescriptor::default(), cmd_tx)
            .await;
        assert!(matches!(result, Err(HubError::BadSecret(_))));
    }

    #[tokio::test]
    async fn register_unknown_agent_is_rejected() {
        let (handle, _stores, _owner, _repo) = test_rig();
        let (cmd_tx, _rx) = mpsc::unbounded_channel();
        let result = handle
            .register_agent(Uuid::new_v4(), "ghost".to_string(), "x".to_string(), HostDescriptor::default(), cmd_tx)
            .await;
        assert!(matches!(result, Err(HubError::BadSecret(_))));
    }

    // ── Assignment / start / open ─────────────────────────────────────────────

    #[tokio::test]
    async fn open_session_with_no_agent_returns_no_agent() {
        let (handle, stores, owner, repo_id) = test_rig();
        let session = Session::new(owner, "demo", AiTool::Claude, repo_id);
        let session_id = session.id;
        stores.sessions.lock().unwrap().insert(session_id, session);

        let (sink, _rx) = mpsc::unbounded_channel();
        let result = handle.open_session(session_id, owner, sink).await;
        assert!(matches!(result, Err(HubError::NoAgent(AiTool::Claude))));
    }

    #[tokio::test]
    async fn open_session_starts_worker_and_returns_empty_snapshot() {
        let (handle, stores, owner, repo_id) = test_rig();
        let (_agent_id, mut cmd_rx) = register_test_agent(&handle, &stores, AiTool::Claude).await;

        let session = Session::new(owner, "demo", AiTool::Claude, repo_id);
        let session_id = session.id;
        stores.sessions.lock().unwrap().insert(session_id, session);

        let (sink, _rx) = mpsc::unbounded_channel();
        let snapshot = handle.open_session(session_id, owner, sink).await.unwrap();
        assert!(snapshot.is_empty());

        let cmd = cmd_rx.recv().await.unwrap();
        assert!(matches!(cmd, HubCommand::WorkerStart { .. }));

        let stored = stores.sessions.lock().unwrap().get(&session_id).cloned().unwrap();
        assert!(stored.worker_id.is_some());
        assert_eq!(stored.status, SessionStatus::Active);
    }

    #[tokio::test]
    async fn open_session_rejects_non_owner() {
        let (handle, stores, owner, repo_id) = test_rig();
        let session = Session::new(owner, "demo", AiTool::Claude, repo_id);
        let session_id = session.id;
        stores.sessions.lock().unwrap().insert(session_id, session);

        let (sink, _rx) = mpsc::unbounded_channel();
        let result = handle.open_session(session_id, Uuid::new_v4(), sink).await;
        assert!(matches!(result, Err(HubError::NotOwner { .. })));
    }

    // ── Event fan-out ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn worker_event_appends_message_and_forwards_to_client() {
        let (handle, stores, owner, repo_id) = test_rig();
        let (agent_id, mut cmd_rx) = register_test_agent(&handle, &stores, AiTool::Claude).await;

        let session = Session::new(owner, "demo", AiTool::Claude, repo_id);
        let session_id = session.id;
        stores.sessions.lock().unwrap().insert(session_id, session);

        let (sink, mut client_rx) = mpsc::unbounded_channel();
        handle.open_session(session_id, owner, sink).await.unwrap();
        let HubCommand::WorkerStart { task_id, .. } = cmd_rx.recv().await.unwrap() else {
            panic!("expected worker:start");
        };

        handle
            .worker_event(agent_id, task_id, CliEvent::Text { delta: "hello".to_string() })
            .await;

        let forwarded = tokio::time::timeout(Duration::from_millis(200), client_rx.recv()).await.unwrap().unwrap();
        assert!(matches!(forwarded, ClientEvent::SessionEvent { .. }));

        let logged = stores.messages.lock().unwrap().clone();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].content, "hello");
    }

    #[tokio::test]
    async fn result_event_then_stopped_status_completes_session() {
        let (handle, stores, owner, repo_id) = test_rig();
        let (agent_id, mut cmd_rx) = register_test_agent(&handle, &stores, AiTool::Claude).await;

        let session = Session::new(owner, "demo", AiTool::Claude, repo_id);
        let session_id = session.id;
        stores.sessions.lock().unwrap().insert(session_id, session);

        let (sink, _rx) = mpsc::unbounded_channel();
        handle.open_session(session_id, owner, sink).await.unwrap();
        let HubCommand::WorkerStart { task_id, .. } = cmd_rx.recv().await.unwrap() else {
            panic!("expected worker:start");
        };

        handle
            .worker_event(
                agent_id,
                task_id,
                CliEvent::Result {
                    text: "done".to_string(),
                    duration_ms: 10,
                    api_ms: 5,
                    turns: 1,
                    usage: aihub_protocol::Usage::default(),
                    cost_usd: 0.01,
                },
            )
            .await;
        handle.worker_status(agent_id, task_id, WorkerState::Stopped, None).await;

        tokio::time::sleep(Duration::from_millis(30)).await;
        let stored = stores.sessions.lock().unwrap().get(&session_id).cloned().unwrap();
        assert_eq!(stored.status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn worker_error_without_resume_token_pauses_session() {
        let (handle, stores, owner, repo_id) = test_rig();
        let (agent_id, mut cmd_rx) = register_test_agent(&handle, &stores, AiTool::Claude).await;

        let session = Session::new(owner, "demo", AiTool::Claude, repo_id);
        let session_id = session.id;
        stores.sessions.lock().unwrap().insert(session_id, session);

        let (sink, _rx) = mpsc::unbounded_channel();
        handle.open_session(session_id, owner, sink).await.unwrap();
        let HubCommand::WorkerStart { task_id, .. } = cmd_rx.recv().await.unwrap() else {
            panic!("expected worker:start");
        };

        handle
            .worker_status(agent_id, task_id, WorkerState::Error, Some("boom".to_string()))
            .await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        let stored = stores.sessions.lock().unwrap().get(&session_id).cloned().unwrap();
        assert_eq!(stored.status, SessionStatus::Paused);
    }

    // ── Cancellation ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn cancel_sends_worker_stop_and_pauses_session() {
        let (handle, stores, owner, repo_id) = test_rig();
        let (_agent_id, mut cmd_rx) = register_test_agent(&handle, &stores, AiTool::Claude).await;

        let session = Session::new(owner, "demo", AiTool::Claude, repo_id);
        let session_id = session.id;
        stores.sessions.lock().unwrap().insert(session_id, session);

        let (sink, _rx) = mpsc::unbounded_channel();
        handle.open_session(session_id, owner, sink).await.unwrap();
        let _ = cmd_rx.recv().await.unwrap();

        handle.session_cancel(session_id, owner).await.unwrap();
        let cmd = cmd_rx.recv().await.unwrap();
        assert!(matches!(cmd, HubCommand::WorkerStop { .. }));

        let stored = stores.sessions.lock().unwrap().get(&session_id).cloned().unwrap();
        assert_eq!(stored.status, SessionStatus::Paused);
    }

    #[tokio::test]
    async fn cancel_forces_stop_after_grace_period_if_unconfirmed() {
        let (handle, stores, owner, repo_id) = test_rig();
        let (agent_id, mut cmd_rx) = register_test_agent(&handle, &stores, AiTool::Claude).await;

        let session = Session::new(owner, "demo", AiTool::Claude, repo_id);
        let session_id = session.id;
        stores.sessions.lock().unwrap().insert(session_id, session);

        let (sink, _rx) = mpsc::unbounded_channel();
        handle.open_session(session_id, owner, sink).await.unwrap();
        let HubCommand::WorkerStart { task_id, .. } = cmd_rx.recv().await.unwrap() else {
            panic!("expected worker:start");
        };

        handle.session_cancel(session_id, owner).await.unwrap();
        let _ = cmd_rx.recv().await.unwrap(); // worker:stop

        // Never confirm worker:status{stopped}; wait past the test grace period
        // and then deliver it late anyway, which must be a harmless no-op.
        tokio::time::sleep(Duration::from_millis(150)).await;
        handle.worker_status(agent_id, task_id, WorkerState::Stopped, None).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        let stored = stores.sessions.lock().unwrap().get(&session_id).cloned().unwrap();
        assert_eq!(stored.status, SessionStatus::Paused);
    }

    // ── Agent disconnect ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn agent_disconnect_pauses_live_sessions_after_grace_period() {
        let (handle, stores, owner, repo_id) = test_rig();
        let (agent_id, mut cmd_rx) = register_test_agent(&handle, &stores, AiTool::Claude).await;

        let session = Session::new(owner, "demo", AiTool::Claude, repo_id);
        let session_id = session.id;
        stores.sessions.lock().unwrap().insert(session_id, session);

        let (sink, _rx) = mpsc::unbounded_channel();
        handle.open_session(session_id, owner, sink).await.unwrap();
        let _ = cmd_rx.recv().await.unwrap();

        handle.agent_disconnected(agent_id).await;
        tokio::time::sleep(Duration::from_millis(150)).await;

        let stored = stores.sessions.lock().unwrap().get(&session_id).cloned().unwrap();
        assert_eq!(stored.status, SessionStatus::Paused);
        assert!(stored.worker_id.is_none());
    }
}
