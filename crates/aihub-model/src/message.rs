// SPDX-License-Identifier: Apache-2.0
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageDirection {
    User,
    Assistant,
    System,
}

/// Tool-call details, token usage, or error info attached to a message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageMetadata {
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub input_tokens: Option<u32>,
    #[serde(default)]
    pub output_tokens: Option<u32>,
    #[serde(default)]
    pub cost_usd: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub extra: Value,
}

/// One entry in a session's append-only message log (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub session_id: Uuid,
    pub direction: MessageDirection,
    pub content: String,
    pub metadata: MessageMetadata,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(session_id: Uuid, direction: MessageDirection, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            direction,
            content: content.into(),
            metadata: MessageMetadata::default(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_message_carries_session_and_direction() {
        let sid = Uuid::new_v4();
        let m = Message::new(sid, MessageDirection::User, "hello");
        assert_eq!(m.session_id, sid);
        assert_eq!(m.direction, MessageDirection::User);
        assert_eq!(m.content, "hello");
    }

    #[test]
    fn default_metadata_has_no_usage_or_error() {
        let meta = MessageMetadata::default();
        assert!(meta.tool_name.is_none());
        assert!(meta.input_tokens.is_none());
        assert!(meta.error.is_none());
        assert_eq!(meta.extra, Value::Null);
    }

    #[test]
    fn serde_round_trip_preserves_fields() {
        let m = Message::new(Uuid::new_v4(), MessageDirection::Assistant, "reply");
        let json = serde_json::to_string(&m).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, m.id);
        assert_eq!(back.direction, MessageDirection::Assistant);
    }
}
