// SPDX-License-Identifier: Apache-2.0
//!
//! Hub/agent configuration loaded from YAML. Layers are deep-merged, the
//! same way `sven-node`'s gateway config works: override only the fields
//! you care about in each file.
//!
//! Search order (later overrides earlier):
//! 1. `/etc/aihub/config.yaml`
//! 2. `~/.config/aihub/config.yaml`
//! 3. `.aihub/config.yaml` (workspace-local)
//! 4. Path given to [`load`] explicitly.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::debug;

fn default_hub_bind() -> String {
    "127.0.0.1:7780".to_string()
}

fn default_reconnect_base_ms() -> u64 {
    1_000
}

fn default_reconnect_max_ms() -> u64 {
    30_000
}

fn default_heartbeat_secs() -> u64 {
    15
}

fn default_max_workers() -> u32 {
    4
}

/// Top-level configuration for both `aihub hub start` and `aihub agent start`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub vault: VaultConfig,
}

/// The orchestration hub's own listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// `host:port` the hub's axum server binds to.
    #[serde(default = "default_hub_bind")]
    pub bind: String,
    /// Directory under which cloned-repository workspaces are created.
    #[serde(default = "default_workspaces_root")]
    pub workspaces_root: PathBuf,
    /// Agent records to seed the in-memory `AgentStore` with at startup
    /// (`pending`, per §3's lifecycle) since agent administration has no
    /// REST CRUD surface in this build. A real deployment backs
    /// `AgentStore` with its own admin path instead of this list.
    #[serde(default)]
    pub seed_agents: Vec<SeedAgent>,
}

fn default_workspaces_root() -> PathBuf {
    PathBuf::from("workspaces")
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind: default_hub_bind(),
            workspaces_root: default_workspaces_root(),
            seed_agents: Vec::new(),
        }
    }
}

/// One statically-configured agent record (§3: "created by administrator").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedAgent {
    pub id: uuid::Uuid,
    pub name: String,
    pub secret: String,
    #[serde(default = "default_max_workers")]
    pub max_workers: u32,
}

/// Settings used when this process runs as an agent (`aihub agent start`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// WebSocket URL of the hub to dial, e.g. `ws://hub.internal:7780/ws/agent`.
    #[serde(default = "default_hub_url")]
    pub hub_url: String,
    /// This agent's registered id (must already exist in the hub's `AgentStore`).
    pub agent_id: Option<uuid::Uuid>,
    #[serde(default = "default_agent_name")]
    pub name: String,
    /// Shared registration secret, verified by the hub on connect.
    pub secret: Option<String>,
    #[serde(default = "default_max_workers")]
    pub max_workers: u32,
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
}

fn default_hub_url() -> String {
    "ws://127.0.0.1:7780/ws/agent".to_string()
}

fn default_agent_name() -> String {
    hostname()
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "aihub-agent".to_string())
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            hub_url: default_hub_url(),
            agent_id: None,
            name: default_agent_name(),
            secret: None,
            max_workers: default_max_workers(),
            heartbeat_interval_secs: default_heartbeat_secs(),
            reconnect_base_ms: default_reconnect_base_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
        }
    }
}

/// Credential vault key source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Path to a file containing the raw 32-byte vault key, base64-encoded.
    /// Every agent in the fleet must be configured with the same key (§4.5).
    pub key_file: Option<PathBuf>,
}

// ── Loader ──────────────────────────────────────────────────────────────

fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    paths.push(PathBuf::from("/etc/aihub/config.yaml"));
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".config/aihub/config.yaml"));
    }
    paths.push(PathBuf::from(".aihub/config.yaml"));
    paths
}

pub fn load(extra: Option<&Path>) -> anyhow::Result<Config> {
    let mut merged = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());

    for path in config_search_paths() {
        if path.is_file() {
            debug!(path = %path.display(), "loading aihub config layer");
            let text = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
            let layer: serde_yaml::Value = serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
            merge_yaml(&mut merged, layer);
        }
    }

    if let Some(p) = extra {
        debug!(path = %p.display(), "loading explicit aihub config");
        let text = std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?;
        let layer: serde_yaml::Value = serde_yaml::from_str(&text).with_context(|| format!("parsing {}", p.display()))?;
        merge_yaml(&mut merged, layer);
    }

    let config: Config = if matches!(&merged, serde_yaml::Value::Mapping(m) if m.is_empty()) {
        Config::default()
    } else {
        serde_yaml::from_value(merged).unwrap_or_default()
    };
    Ok(config)
}

fn merge_yaml(dst: &mut serde_yaml::Value, src: serde_yaml::Value) {
    match (dst, src) {
        (serde_yaml::Value::Mapping(d), serde_yaml::Value::Mapping(s)) => {
            for (k, v) in s {
                let entry = d.entry(k).or_insert(serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
                merge_yaml(entry, v);
            }
        }
        (dst, src) => *dst = src,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_hub_bind_is_loopback() {
        let c = Config::default();
        assert!(c.hub.bind.starts_with("127.0.0.1"));
    }

    #[test]
    fn default_agent_has_no_secret() {
        let c = Config::default();
        assert!(c.agent.secret.is_none());
    }

    #[test]
    fn config_yaml_round_trip() {
        let c = Config::default();
        let yaml = serde_yaml::to_string(&c).unwrap();
        let back: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.hub.bind, c.hub.bind);
    }

    #[test]
    fn explicit_override_wins_over_defaults() {
        let yaml = "hub:\n  bind: \"0.0.0.0:9000\"\n";
        let c: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(c.hub.bind, "0.0.0.0:9000");
        assert_eq!(c.hub.workspaces_root, default_workspaces_root());
    }

    #[test]
    fn load_returns_defaults_when_no_files_exist() {
        let c = load(None).unwrap();
        assert_eq!(c.hub.bind, default_hub_bind());
    }

    #[test]
    fn seed_agents_parse_from_yaml() {
        let yaml = "hub:\n  seed_agents:\n    - id: \"00000000-0000-0000-0000-000000000001\"\n      name: box-1\n      secret: s3cr3t\n";
        let c: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(c.hub.seed_agents.len(), 1);
        assert_eq!(c.hub.seed_agents[0].name, "box-1");
        assert_eq!(c.hub.seed_agents[0].max_workers, default_max_workers());
    }
}
