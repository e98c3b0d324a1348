//! Live-channel wire format.
//!
//! Outbound frames are `{content, created_at, created_by}` with optional
//! `id` (identified sends) and `correlation_id` (own announce). Inbound
//! frames carry a `type` discriminant (`presence` / `chat`); frames from
//! servers that predate the discriminant are classified by shape.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::presence::PresenceSnapshot;
use crate::timeline::{MessageId, SYSTEM_SENDER};

/// A frame written to the live channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundFrame {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
    pub content: String,
    pub created_at: String,
    pub created_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl OutboundFrame {
    /// Chat frame for a message the server has already stored.
    pub fn identified(
        id: MessageId,
        content: impl Into<String>,
        created_at: impl Into<String>,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            id: Some(id),
            content: content.into(),
            created_at: created_at.into(),
            created_by: created_by.into(),
            correlation_id: None,
        }
    }

    /// System notice announcing that `username` entered the chat.
    pub fn entered(username: &str, created_at: impl Into<String>, correlation_id: &str) -> Self {
        Self {
            id: None,
            content: entered_text(username),
            created_at: created_at.into(),
            created_by: SYSTEM_SENDER.to_string(),
            correlation_id: Some(correlation_id.to_string()),
        }
    }

    /// System notice announcing that `username` left the chat.
    pub fn left(username: &str, created_at: impl Into<String>) -> Self {
        Self {
            id: None,
            content: left_text(username),
            created_at: created_at.into(),
            created_by: SYSTEM_SENDER.to_string(),
            correlation_id: None,
        }
    }

    pub fn to_json(&self) -> String {
        // Only strings and integers; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

pub fn entered_text(username: &str) -> String {
    format!("User {username} entered the chat")
}

pub fn left_text(username: &str) -> String {
    format!("User {username} left the chat")
}

/// Chat payload of an inbound frame.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChatPayload {
    #[serde(default)]
    pub id: Option<MessageId>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

/// Presence payload of an inbound frame.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PresencePayload {
    #[serde(default)]
    pub count: Option<usize>,
    #[serde(default)]
    pub userlist: Option<BTreeMap<String, serde_json::Value>>,
}

impl PresencePayload {
    /// The user list wins over the count whenever both are present.
    pub fn into_snapshot(self) -> PresenceSnapshot {
        match self.userlist {
            Some(list) => PresenceSnapshot::from_users(list.into_keys()),
            None => PresenceSnapshot::from_count(self.count.unwrap_or(0)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum TaggedFrame {
    Presence(PresencePayload),
    Chat(ChatPayload),
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Presence(PresencePayload),
    Chat(ChatPayload),
}

impl InboundFrame {
    /// Decode one text frame. Returns `None` for frames that are not JSON
    /// objects or whose discriminant is unknown.
    pub fn decode(text: &str) -> Option<Self> {
        let value: serde_json::Value = serde_json::from_str(text).ok()?;
        let obj = value.as_object()?;

        if obj.contains_key("type") {
            return match serde_json::from_value::<TaggedFrame>(value) {
                Ok(TaggedFrame::Presence(p)) => Some(InboundFrame::Presence(p)),
                Ok(TaggedFrame::Chat(c)) => Some(InboundFrame::Chat(c)),
                Err(_) => None,
            };
        }

        if obj.contains_key("userlist") || obj.contains_key("count") {
            return serde_json::from_value(value).ok().map(InboundFrame::Presence);
        }
        serde_json::from_value(value).ok().map(InboundFrame::Chat)
    }
}
