use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A chat user as carried on event frames.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub role: String,
}

impl User {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
}

/// A channel payload embedded in events.
///
/// `cid` is the composite identifier `{channel_type}:{id}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    #[serde(default)]
    pub cid: String,
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub channel_type: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub members: Vec<Member>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// A channel membership entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub user: User,
}

/// Message type marking server-generated system messages. System messages
/// must never surface a channel into an active query result.
pub const MESSAGE_TYPE_SYSTEM: &str = "system";

/// A message payload embedded in events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(default)]
    pub cid: String,
    #[serde(default)]
    pub text: String,
    #[serde(rename = "type", default)]
    pub message_type: String,
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Message {
    /// True for server-generated system messages.
    pub fn is_system(&self) -> bool {
        self.message_type == MESSAGE_TYPE_SYSTEM
    }
}

/// A reaction payload embedded in events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reaction {
    #[serde(default)]
    pub message_id: String,
    #[serde(rename = "type", default)]
    pub reaction_type: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub score: i32,
}

/// Opaque channel-list query filter.
///
/// The connection core never interprets it; it is passed through to
/// event handlers so application-specific policies can match against the
/// query that produced a channel collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterObject(pub serde_json::Map<String, serde_json::Value>);
