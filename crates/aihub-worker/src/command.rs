// SPDX-License-Identifier: Apache-2.0
//!
//! Maps a [`WorkerConfig`] onto the concrete binary and flags for one CLI
//! tool. Every tool is spawned non-interactively with JSONL streamed on
//! stdout (§4.7); secrets travel via environment variables, never as
//! argv (they would otherwise show up in `ps`).

use std::collections::HashMap;

use crate::config::{WorkerConfig, WorkerError};

pub struct BuiltCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

pub fn build(cfg: &WorkerConfig) -> Result<BuiltCommand, WorkerError> {
    let mut env = HashMap::new();
    if let Some(key) = &cfg.api_key {
        env.insert("AIHUB_WORKER_API_KEY".to_string(), key.clone());
    }
    if let Some(base_url) = &cfg.base_url {
        env.insert("AIHUB_WORKER_BASE_URL".to_string(), base_url.clone());
    }

    match cfg.tool.as_str() {
        "claude" => Ok(claude_command(cfg, env)),
        "cursor" => Ok(cursor_command(cfg, env)),
        "qwcoder" => Ok(qwcoder_command(cfg, env)),
        other => Err(WorkerError::UnknownTool(other.to_string())),
    }
}

fn claude_command(cfg: &WorkerConfig, env: HashMap<String, String>) -> BuiltCommand {
    let mut args = vec!["--output-format".to_string(), "stream-json".to_string(), "--verbose".to_string()];
    if let Some(model) = &cfg.model {
        args.push("--model".to_string());
        args.push(model.clone());
    }
    if let Some(resume_id) = &cfg.resume_id {
        args.push("--resume".to_string());
        args.push(resume_id.clone());
    }
    if let Some(prompt) = &cfg.initial_prompt {
        args.push("-p".to_string());
        args.push(prompt.clone());
    }
    BuiltCommand {
        program: "claude".to_string(),
        args,
        env,
    }
}

fn cursor_command(cfg: &WorkerConfig, env: HashMap<String, String>) -> BuiltCommand {
    let mut args = vec!["agent".to_string(), "--output-format".to_string(), "stream-json".to_string()];
    if let Some(model) = &cfg.model {
        args.push("--model".to_string());
        args.push(model.clone());
    }
    if let Some(resume_id) = &cfg.resume_id {
        args.push("--resume".to_string());
        args.push(resume_id.clone());
    }
    if let Some(prompt) = &cfg.initial_prompt {
        args.push("--prompt".to_string());
        args.push(prompt.clone());
    }
    BuiltCommand {
        program: "cursor-agent".to_string(),
        args,
        env,
    }
}

fn qwcoder_command(cfg: &WorkerConfig, env: HashMap<String, String>) -> BuiltCommand {
    let mut args = vec!["--stream".to_string(), "--format".to_string(), "jsonl".to_string()];
    if let Some(model) = &cfg.model {
        args.push("--model".to_string());
        args.push(model.clone());
    }
    if let Some(temp) = cfg.temperature {
        args.push("--temperature".to_string());
        args.push(temp.to_string());
    }
    if let Some(max_tokens) = cfg.max_tokens {
        args.push("--max-tokens".to_string());
        args.push(max_tokens.to_string());
    }
    if let Some(prompt) = &cfg.initial_prompt {
        args.push("--prompt".to_string());
        args.push(prompt.clone());
    }
    BuiltCommand {
        program: "qwen-coder".to_string(),
        args,
        env,
    }
}
