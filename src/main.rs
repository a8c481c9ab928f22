// SPDX-License-Identifier: Apache-2.0
mod cli;
mod config;

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};
use uuid::Uuid;

use aihub_hub::{Orchestrator, StaticCredentialResolver};
use aihub_model::{Agent, AiTool, MemAgentStore, MemAuditLog, MemRepositoryStore, MemSessionStore};
use aihub_repo::{RepoEngine, Vault};
use cli::{AgentCommands, Cli, Commands, HubCommands, RepoCommands};
use config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match &cli.command {
        Commands::Hub {
            command: HubCommands::Start { config: config_path },
        } => {
            let config = config::load(config_path.as_deref())?;
            run_hub(config).await
        }
        Commands::Agent {
            command: AgentCommands::Start { config: config_path },
        } => {
            let config = config::load(config_path.as_deref())?;
            run_agent(config).await
        }
        Commands::Repo { command } => run_repo_command(command).await,
        Commands::ShowConfig { config: config_path } => {
            let config = config::load(config_path.as_deref())?;
            println!("{}", serde_yaml::to_string(&config)?);
            Ok(())
        }
    }
}

/// Start the orchestration hub: wire the in-memory reference stores (§1
/// leaves real persistence external; see `aihub_model::mem`), seed any
/// statically-configured agents, and serve the agent/client links.
async fn run_hub(config: Config) -> anyhow::Result<()> {
    let agent_store: Arc<dyn aihub_model::AgentStore> = Arc::new(MemAgentStore::new());
    let session_store: Arc<dyn aihub_model::SessionStore> = Arc::new(MemSessionStore::new());
    let repository_store: Arc<dyn aihub_model::RepositoryStore> = Arc::new(MemRepositoryStore::new());
    let audit_log: Arc<dyn aihub_model::AuditLog> = Arc::new(MemAuditLog::new());
    let credentials = Arc::new(StaticCredentialResolver::new());

    for seed in &config.hub.seed_agents {
        let mut agent = Agent::new(seed.name.clone(), seed.secret.clone(), seed.max_workers);
        agent.id = seed.id;
        agent.allowed_tools = vec![AiTool::Claude, AiTool::Cursor, AiTool::QwCoder];
        agent_store.create(agent).await?;
        tracing::info!(agent_id = %seed.id, name = %seed.name, "seeded agent record");
    }

    let (handle, orchestrator) = Orchestrator::new(agent_store, session_store, repository_store, Some(audit_log), credentials);
    tokio::spawn(orchestrator.run());

    let addr = config.hub.bind.parse()?;
    aihub_hub::serve(addr, handle).await
}

/// Start an agent worker process: dial the hub, register, and relay
/// worker control frames forever (reconnecting with backoff on link loss).
async fn run_agent(config: Config) -> anyhow::Result<()> {
    let agent_id = config.agent.agent_id.unwrap_or_else(Uuid::new_v4);
    let secret = config
        .agent
        .secret
        .clone()
        .ok_or_else(|| anyhow::anyhow!("agent.secret must be set in config"))?;

    let mut link_config = aihub_agentlink::AgentLinkConfig::new(config.agent.hub_url.clone(), agent_id, config.agent.name.clone(), secret);
    link_config.heartbeat_interval = std::time::Duration::from_secs(config.agent.heartbeat_interval_secs);
    link_config.reconnect_base_delay = std::time::Duration::from_millis(config.agent.reconnect_base_ms);
    link_config.reconnect_max_delay = std::time::Duration::from_millis(config.agent.reconnect_max_ms);

    let repo_engine = match &config.vault.key_file {
        Some(path) => {
            let encoded = std::fs::read_to_string(path)?;
            let key_bytes = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, encoded.trim())?;
            let vault = Vault::from_key_bytes(&key_bytes)?;
            Some(Arc::new(RepoEngine::new(vault, config.hub.workspaces_root.clone())))
        }
        None => {
            tracing::warn!("no vault.key_file configured; credentialed repository clones will fail");
            None
        }
    };

    aihub_agentlink::run(link_config, repo_engine).await;
    Ok(())
}

/// `aihub repo test`/`aihub repo branches`: probe a repository without
/// starting a session, using an ephemeral vault (no credentials needed
/// for public repositories or local paths).
async fn run_repo_command(cmd: &RepoCommands) -> anyhow::Result<()> {
    let vault = Vault::from_key_bytes(&[0u8; 32])?;
    let engine = RepoEngine::new(vault, std::env::temp_dir().join("aihub-repo-cli"));

    match cmd {
        RepoCommands::Test { path_or_url, branch } => {
            let repo_type = guess_repo_type(path_or_url);
            let mut repo = aihub_model::Repository::new(Uuid::nil(), "cli-probe", path_or_url.clone(), repo_type);
            repo.requested_branch = branch.clone();
            let result = engine.test_with_retry(&mut repo, None, None).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.success {
                std::process::exit(1);
            }
            Ok(())
        }
        RepoCommands::Branches { path_or_url } => {
            let repo_type = guess_repo_type(path_or_url);
            let mut repo = aihub_model::Repository::new(Uuid::nil(), "cli-probe", path_or_url.clone(), repo_type);
            let result = engine.branches(&mut repo, None).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
    }
}

fn guess_repo_type(path_or_url: &str) -> aihub_model::RepositoryType {
    if std::path::Path::new(path_or_url).is_dir() {
        aihub_model::RepositoryType::Local
    } else {
        aihub_model::RepositoryType::Git
    }
}

fn init_logging(verbosity: u8) {
    let default_level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::registry().with(fmt::layer()).with(filter).try_init();
}
