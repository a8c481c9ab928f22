// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use clap::{Parser, Subcommand};

// ── Hub subcommand ──────────────────────────────────────────────────────

/// `aihub hub` subcommands.
#[derive(Subcommand, Debug)]
pub enum HubCommands {
    /// Start the orchestration hub.
    ///
    /// Serves the agent link (`/ws/agent`) and the client link
    /// (`/ws/client/:owner_user_id`) over one HTTP listener, and owns the
    /// Session Orchestrator that dispatches work across every connected
    /// agent.
    Start {
        /// Path to the hub config file (overrides auto-discovery).
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,
    },
}

// ── Agent subcommand ────────────────────────────────────────────────────

/// `aihub agent` subcommands.
#[derive(Subcommand, Debug)]
pub enum AgentCommands {
    /// Start an agent worker process.
    ///
    /// Dials the configured hub over WebSocket, registers with its shared
    /// secret, and spawns CLI-tool workers on demand as the hub assigns
    /// sessions to this agent.
    Start {
        /// Path to the agent config file (overrides auto-discovery).
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,
    },
}

// ── Repo subcommand ─────────────────────────────────────────────────────

/// `aihub repo` subcommands.
#[derive(Subcommand, Debug)]
pub enum RepoCommands {
    /// Probe a repository (clone URL or local path) and report reachability.
    ///
    /// Runs the same bounded-retry connection test the hub runs before
    /// accepting a repository for session use, then prints the outcome
    /// (success/failure, attempt count, resolved branch).
    Test {
        /// Git URL or local filesystem path.
        path_or_url: String,
        /// Branch to validate, if any. Falls back to the default branch
        /// when omitted or invalid.
        #[arg(long, short = 'b')]
        branch: Option<String>,
    },
    /// List the branches discoverable on a repository without cloning it.
    Branches {
        /// Git URL or local filesystem path.
        path_or_url: String,
    },
}

#[derive(Parser, Debug)]
#[command(
    name = "aihub",
    about = "AI-tool orchestration hub: brokers sessions between browser clients and a fleet of agent workers",
    version,
    long_about = None,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v = debug, -vv = trace)
    #[arg(long, short = 'v', global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Hub: start the orchestration hub.
    Hub {
        #[command(subcommand)]
        command: HubCommands,
    },

    /// Agent: start an agent worker process.
    Agent {
        #[command(subcommand)]
        command: AgentCommands,
    },

    /// Repo: test connectivity and list branches without starting a session.
    Repo {
        #[command(subcommand)]
        command: RepoCommands,
    },

    /// Print the effective configuration and exit.
    ShowConfig {
        /// Path to the config file (overrides auto-discovery).
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,
    },
}
