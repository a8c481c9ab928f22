// SPDX-License-Identifier: Apache-2.0
//!
//! Parses a coding CLI's JSONL stdout into a closed set of structured
//! events (C6). The parser is pure: it never touches the filesystem or a
//! socket, and it emits one event per line with no end-of-stream buffering.
//! A line that isn't valid JSON at all is never dropped — it is delivered
//! verbatim as a `text` event so a caller never silently loses output.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Token/cost accounting attached to `assistant` and `result` events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: Option<u64>,
    #[serde(default)]
    pub output_tokens: Option<u64>,
    #[serde(default)]
    pub cost_usd: Option<f64>,
}

/// One event parsed from a single JSONL line of a CLI's stdout (§4.6).
/// The variant set is closed: anything the parser doesn't recognize
/// becomes [`CliEvent::Unknown`] rather than a new variant, and anything
/// that isn't JSON at all becomes [`CliEvent::Text`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CliEvent {
    /// Incremental assistant text chunk.
    Text { delta: String },

    /// The CLI is invoking a tool.
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },

    /// A tool call returned.
    ToolResult { use_id: String, content: Value },

    /// A complete assistant turn; may carry token usage.
    Assistant {
        message: String,
        #[serde(default)]
        usage: Option<Usage>,
    },

    /// Initialization, model info, or token accounting out of band from a
    /// turn. `fields` carries whatever the CLI attached beyond `subtype`.
    System {
        subtype: String,
        #[serde(default)]
        fields: Value,
    },

    /// Terminal record for the invocation.
    Result {
        text: String,
        duration_ms: u64,
        api_ms: u64,
        turns: u32,
        usage: Usage,
        cost_usd: f64,
    },

    Error { message: String },

    /// An unrecognized `type` value. `raw` is the full parsed JSON line.
    Unknown { raw: Value },
}

/// Parse one line of a CLI's stdout into a [`CliEvent`] (§4.6). Never
/// fails: a line that is not valid JSON becomes a verbatim `text` event
/// instead of being dropped.
pub fn parse_line(line: &str) -> CliEvent {
    let trimmed = line.trim_end_matches(['\n', '\r']);
    if trimmed.is_empty() {
        return CliEvent::Text {
            delta: String::new(),
        };
    }
    match serde_json::from_str::<CliEvent>(trimmed) {
        Ok(event) => event,
        Err(_) => match serde_json::from_str::<Value>(trimmed) {
            // Valid JSON, but `type` is missing or doesn't match a known
            // variant — preserve it rather than coercing to plain text.
            Ok(raw) => CliEvent::Unknown { raw },
            // Not JSON at all — the CLI printed something off-protocol.
            Err(_) => CliEvent::Text {
                delta: trimmed.to_string(),
            },
        },
    }
}
