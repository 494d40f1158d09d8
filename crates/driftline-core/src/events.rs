//! Typed event vocabulary for the real-time connection.
//!
//! Wire frames are JSON objects with a mandatory `type` discriminator.
//! Decoding is keyed on that string; unknown discriminators map to
//! [`EventPayload::Unknown`] so new server event types never break the
//! client. The connection-ack special case (the first frame of a
//! connection) is handled by the parser, not here.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::ChatError;
use crate::models::{Channel, Member, Message, Reaction, User};

/// Wire discriminators for server events, plus the synthetic lifecycle
/// types produced locally by the observable layer.
pub mod event_types {
    pub const HEALTH_CHECK: &str = "health.check";
    pub const MESSAGE_NEW: &str = "message.new";
    pub const MESSAGE_UPDATED: &str = "message.updated";
    pub const MESSAGE_DELETED: &str = "message.deleted";
    pub const MESSAGE_READ: &str = "message.read";
    pub const TYPING_START: &str = "typing.start";
    pub const TYPING_STOP: &str = "typing.stop";
    pub const REACTION_NEW: &str = "reaction.new";
    pub const REACTION_DELETED: &str = "reaction.deleted";
    pub const MEMBER_ADDED: &str = "member.added";
    pub const MEMBER_REMOVED: &str = "member.removed";
    pub const CHANNEL_UPDATED: &str = "channel.updated";
    pub const CHANNEL_DELETED: &str = "channel.deleted";
    pub const CHANNEL_HIDDEN: &str = "channel.hidden";
    pub const CHANNEL_VISIBLE: &str = "channel.visible";
    pub const CHANNEL_TRUNCATED: &str = "channel.truncated";
    pub const USER_PRESENCE_CHANGED: &str = "user.presence.changed";
    pub const USER_WATCHING_START: &str = "user.watching.start";
    pub const USER_WATCHING_STOP: &str = "user.watching.stop";
    pub const NOTIFICATION_MESSAGE_NEW: &str = "notification.message_new";
    pub const NOTIFICATION_ADDED_TO_CHANNEL: &str = "notification.added_to_channel";
    pub const NOTIFICATION_REMOVED_FROM_CHANNEL: &str = "notification.removed_from_channel";
    pub const NOTIFICATION_CHANNEL_DELETED: &str = "notification.channel_deleted";
    pub const NOTIFICATION_MARK_READ: &str = "notification.mark_read";

    // Synthetic lifecycle types, never received from the wire.
    pub const CONNECTION_CONNECTING: &str = "connection.connecting";
    pub const CONNECTION_DISCONNECTED: &str = "connection.disconnected";
    pub const CONNECTION_ERROR: &str = "connection.error";
}

/// The per-variant content of a [`ChatEvent`].
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    /// Connection acknowledgment: the resolved first frame of a connection.
    Connected {
        me: User,
        connection_id: String,
    },
    /// Server reply to a client health check (after the ack).
    Health {
        connection_id: Option<String>,
    },
    NewMessage {
        cid: String,
        user: User,
        message: Message,
        watcher_count: Option<i32>,
        total_unread_count: Option<i32>,
        unread_channels: Option<i32>,
    },
    MessageUpdated {
        cid: String,
        user: User,
        message: Message,
    },
    MessageDeleted {
        cid: String,
        user: Option<User>,
        message: Message,
    },
    MessageRead {
        cid: String,
        user: User,
        watcher_count: Option<i32>,
    },
    TypingStart {
        cid: String,
        user: User,
    },
    TypingStop {
        cid: String,
        user: User,
    },
    ReactionNew {
        cid: String,
        user: User,
        message: Message,
        reaction: Reaction,
    },
    ReactionDeleted {
        cid: String,
        user: User,
        message: Message,
        reaction: Reaction,
    },
    MemberAdded {
        cid: String,
        member: Member,
    },
    MemberRemoved {
        cid: String,
        user: User,
    },
    ChannelUpdated {
        cid: String,
        channel: Channel,
        message: Option<Message>,
    },
    ChannelDeleted {
        cid: String,
        channel: Channel,
        user: Option<User>,
    },
    ChannelHidden {
        cid: String,
        user: Option<User>,
        clear_history: bool,
    },
    ChannelVisible {
        cid: String,
        user: User,
    },
    ChannelTruncated {
        cid: String,
        channel: Channel,
        user: Option<User>,
    },
    UserPresenceChanged {
        user: User,
    },
    UserStartWatching {
        cid: String,
        user: User,
        watcher_count: i32,
    },
    UserStopWatching {
        cid: String,
        user: User,
        watcher_count: i32,
    },
    NotificationMessageNew {
        cid: String,
        user: User,
        message: Message,
        total_unread_count: Option<i32>,
        unread_channels: Option<i32>,
    },
    NotificationAddedToChannel {
        cid: String,
        channel: Option<Channel>,
    },
    NotificationRemovedFromChannel {
        cid: String,
        user: User,
    },
    NotificationChannelDeleted {
        cid: String,
        channel: Channel,
        user: Option<User>,
    },
    NotificationMarkRead {
        cid: String,
        user: User,
        total_unread_count: Option<i32>,
        unread_channels: Option<i32>,
    },
    /// Catch-all for discriminators this client does not know.
    Unknown {
        raw: serde_json::Value,
    },

    // Synthetic lifecycle payloads produced by the observable layer.
    Connecting,
    Disconnected,
    Error {
        error: ChatError,
    },
}

/// An inbound (or synthetic) chat event.
///
/// Constructed once per frame and immutable afterwards, except for
/// `received_at`, which the parser stamps exactly once on receipt.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatEvent {
    pub event_type: String,
    pub created_at: DateTime<Utc>,
    pub received_at: Option<DateTime<Utc>>,
    pub payload: EventPayload,
}

/// Common envelope fields shared by every wire frame.
#[derive(Debug, Deserialize)]
struct WireEnvelope {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default = "Utc::now")]
    created_at: DateTime<Utc>,
}

/// Superset of the fields any known event can carry. Decoded once, then
/// the per-type constructor picks what it needs.
#[derive(Debug, Default, Deserialize)]
struct WireFields {
    #[serde(default)]
    cid: Option<String>,
    #[serde(default)]
    user: Option<User>,
    #[serde(default)]
    me: Option<User>,
    #[serde(default)]
    connection_id: Option<String>,
    #[serde(default)]
    channel: Option<Channel>,
    #[serde(default)]
    member: Option<Member>,
    #[serde(default)]
    message: Option<Message>,
    #[serde(default)]
    reaction: Option<Reaction>,
    #[serde(default)]
    watcher_count: Option<i32>,
    #[serde(default)]
    total_unread_count: Option<i32>,
    #[serde(default)]
    unread_channels: Option<i32>,
    #[serde(default)]
    clear_history: Option<bool>,
}

impl ChatEvent {
    /// Decode a wire frame into a typed event.
    ///
    /// Unknown discriminators and known discriminators with missing
    /// required fields both fall back to [`EventPayload::Unknown`]; only a
    /// frame without a usable envelope is an error.
    pub fn from_frame(value: serde_json::Value) -> Result<Self, ChatError> {
        let envelope: WireEnvelope = serde_json::from_value(value.clone())
            .map_err(|e| ChatError::CantParseEvent(e.to_string()))?;

        let fields: WireFields = serde_json::from_value(value.clone()).unwrap_or_default();
        let payload = decode_payload(&envelope.event_type, fields).unwrap_or_else(|| {
            tracing::debug!(
                event_type = %envelope.event_type,
                "frame did not match a known event shape, keeping as unknown"
            );
            EventPayload::Unknown { raw: value }
        });

        Ok(Self {
            event_type: envelope.event_type,
            created_at: envelope.created_at,
            received_at: None,
            payload,
        })
    }

    /// Decode the connection-ack shape the first frame must carry.
    pub fn from_connection_ack(value: serde_json::Value) -> Result<Self, ChatError> {
        let envelope: WireEnvelope =
            serde_json::from_value(value.clone()).map_err(|_| ChatError::CantParseConnectionEvent)?;
        let fields: WireFields =
            serde_json::from_value(value).map_err(|_| ChatError::CantParseConnectionEvent)?;
        let (me, connection_id) = match (fields.me, fields.connection_id) {
            (Some(me), Some(id)) => (me, id),
            _ => return Err(ChatError::CantParseConnectionEvent),
        };
        Ok(Self {
            event_type: envelope.event_type,
            created_at: envelope.created_at,
            received_at: None,
            payload: EventPayload::Connected { me, connection_id },
        })
    }

    fn synthetic(event_type: &str, payload: EventPayload) -> Self {
        let now = Utc::now();
        Self {
            event_type: event_type.to_string(),
            created_at: now,
            received_at: Some(now),
            payload,
        }
    }

    /// Synthetic event announcing a connection attempt.
    pub fn connecting() -> Self {
        Self::synthetic(event_types::CONNECTION_CONNECTING, EventPayload::Connecting)
    }

    /// Synthetic event announcing a disconnect.
    pub fn disconnected() -> Self {
        Self::synthetic(
            event_types::CONNECTION_DISCONNECTED,
            EventPayload::Disconnected,
        )
    }

    /// Synthetic event carrying a connection error.
    pub fn connection_error(error: ChatError) -> Self {
        Self::synthetic(event_types::CONNECTION_ERROR, EventPayload::Error { error })
    }

    /// Stamp the receipt timestamp. Only the first call has any effect.
    pub fn stamp_received(&mut self, at: DateTime<Utc>) {
        if self.received_at.is_none() {
            self.received_at = Some(at);
        }
    }

    /// Composite channel id for channel-scoped events.
    pub fn cid(&self) -> Option<&str> {
        use EventPayload::{
            ChannelDeleted, ChannelHidden, ChannelTruncated, ChannelUpdated, ChannelVisible,
            MemberAdded, MemberRemoved, MessageDeleted, MessageRead, MessageUpdated, NewMessage,
            NotificationAddedToChannel, NotificationChannelDeleted, NotificationMarkRead,
            NotificationMessageNew, NotificationRemovedFromChannel, ReactionDeleted, ReactionNew,
            TypingStart, TypingStop, UserStartWatching, UserStopWatching,
        };
        match &self.payload {
            NewMessage { cid, .. }
            | MessageUpdated { cid, .. }
            | MessageDeleted { cid, .. }
            | MessageRead { cid, .. }
            | TypingStart { cid, .. }
            | TypingStop { cid, .. }
            | ReactionNew { cid, .. }
            | ReactionDeleted { cid, .. }
            | MemberAdded { cid, .. }
            | MemberRemoved { cid, .. }
            | ChannelUpdated { cid, .. }
            | ChannelDeleted { cid, .. }
            | ChannelHidden { cid, .. }
            | ChannelVisible { cid, .. }
            | ChannelTruncated { cid, .. }
            | UserStartWatching { cid, .. }
            | UserStopWatching { cid, .. }
            | NotificationMessageNew { cid, .. }
            | NotificationAddedToChannel { cid, .. }
            | NotificationRemovedFromChannel { cid, .. }
            | NotificationChannelDeleted { cid, .. }
            | NotificationMarkRead { cid, .. } => Some(cid),
            _ => None,
        }
    }

    /// The acting user, for events that carry one.
    pub fn user(&self) -> Option<&User> {
        use EventPayload::{
            ChannelDeleted, ChannelHidden, ChannelTruncated, ChannelVisible, MemberRemoved,
            MessageDeleted, MessageRead, MessageUpdated, NewMessage, NotificationChannelDeleted,
            NotificationMarkRead, NotificationMessageNew, NotificationRemovedFromChannel,
            ReactionDeleted, ReactionNew, TypingStart, TypingStop, UserPresenceChanged,
            UserStartWatching, UserStopWatching,
        };
        match &self.payload {
            NewMessage { user, .. }
            | MessageUpdated { user, .. }
            | MessageRead { user, .. }
            | TypingStart { user, .. }
            | TypingStop { user, .. }
            | ReactionNew { user, .. }
            | ReactionDeleted { user, .. }
            | MemberRemoved { user, .. }
            | ChannelVisible { user, .. }
            | UserPresenceChanged { user, .. }
            | UserStartWatching { user, .. }
            | UserStopWatching { user, .. }
            | NotificationMessageNew { user, .. }
            | NotificationRemovedFromChannel { user, .. }
            | NotificationMarkRead { user, .. } => Some(user),
            MessageDeleted { user, .. }
            | ChannelDeleted { user, .. }
            | ChannelHidden { user, .. }
            | ChannelTruncated { user, .. }
            | NotificationChannelDeleted { user, .. } => user.as_ref(),
            _ => None,
        }
    }

    /// The message carried by message and reaction events.
    pub fn message(&self) -> Option<&Message> {
        use EventPayload::{
            ChannelUpdated, MessageDeleted, MessageUpdated, NewMessage, NotificationMessageNew,
            ReactionDeleted, ReactionNew,
        };
        match &self.payload {
            NewMessage { message, .. }
            | MessageUpdated { message, .. }
            | MessageDeleted { message, .. }
            | ReactionNew { message, .. }
            | ReactionDeleted { message, .. }
            | NotificationMessageNew { message, .. } => Some(message),
            ChannelUpdated { message, .. } => message.as_ref(),
            _ => None,
        }
    }

    /// The full channel payload, where the event embeds one.
    pub fn channel(&self) -> Option<&Channel> {
        use EventPayload::{
            ChannelDeleted, ChannelTruncated, ChannelUpdated, NotificationAddedToChannel,
            NotificationChannelDeleted,
        };
        match &self.payload {
            ChannelUpdated { channel, .. }
            | ChannelDeleted { channel, .. }
            | ChannelTruncated { channel, .. }
            | NotificationChannelDeleted { channel, .. } => Some(channel),
            NotificationAddedToChannel { channel, .. } => channel.as_ref(),
            _ => None,
        }
    }

    /// The membership entry carried by member events.
    pub fn member(&self) -> Option<&Member> {
        match &self.payload {
            EventPayload::MemberAdded { member, .. } => Some(member),
            _ => None,
        }
    }

    /// The reaction carried by reaction events.
    pub fn reaction(&self) -> Option<&Reaction> {
        match &self.payload {
            EventPayload::ReactionNew { reaction, .. }
            | EventPayload::ReactionDeleted { reaction, .. } => Some(reaction),
            _ => None,
        }
    }

    /// Watcher count, for events that report one.
    pub fn watcher_count(&self) -> Option<i32> {
        match &self.payload {
            EventPayload::NewMessage { watcher_count, .. }
            | EventPayload::MessageRead { watcher_count, .. } => *watcher_count,
            EventPayload::UserStartWatching { watcher_count, .. }
            | EventPayload::UserStopWatching { watcher_count, .. } => Some(*watcher_count),
            _ => None,
        }
    }

    /// Total unread message count for the current user, where reported.
    pub fn total_unread_count(&self) -> Option<i32> {
        match &self.payload {
            EventPayload::NewMessage {
                total_unread_count, ..
            }
            | EventPayload::NotificationMessageNew {
                total_unread_count, ..
            }
            | EventPayload::NotificationMarkRead {
                total_unread_count, ..
            } => *total_unread_count,
            _ => None,
        }
    }

    /// Count of channels with unread messages, where reported.
    pub fn unread_channels(&self) -> Option<i32> {
        match &self.payload {
            EventPayload::NewMessage {
                unread_channels, ..
            }
            | EventPayload::NotificationMessageNew {
                unread_channels, ..
            }
            | EventPayload::NotificationMarkRead {
                unread_channels, ..
            } => *unread_channels,
            _ => None,
        }
    }
}

/// Build the typed payload for a known discriminator.
///
/// Returns `None` when the discriminator is unknown or a required field is
/// missing; the caller keeps the raw frame as an unknown event.
#[allow(clippy::too_many_lines)]
fn decode_payload(event_type: &str, f: WireFields) -> Option<EventPayload> {
    use event_types as t;
    let payload = match event_type {
        t::HEALTH_CHECK => EventPayload::Health {
            connection_id: f.connection_id,
        },
        t::MESSAGE_NEW => EventPayload::NewMessage {
            cid: f.cid?,
            user: f.user?,
            message: f.message?,
            watcher_count: f.watcher_count,
            total_unread_count: f.total_unread_count,
            unread_channels: f.unread_channels,
        },
        t::MESSAGE_UPDATED => EventPayload::MessageUpdated {
            cid: f.cid?,
            user: f.user?,
            message: f.message?,
        },
        t::MESSAGE_DELETED => EventPayload::MessageDeleted {
            cid: f.cid?,
            user: f.user,
            message: f.message?,
        },
        t::MESSAGE_READ => EventPayload::MessageRead {
            cid: f.cid?,
            user: f.user?,
            watcher_count: f.watcher_count,
        },
        t::TYPING_START => EventPayload::TypingStart {
            cid: f.cid?,
            user: f.user?,
        },
        t::TYPING_STOP => EventPayload::TypingStop {
            cid: f.cid?,
            user: f.user?,
        },
        t::REACTION_NEW => EventPayload::ReactionNew {
            cid: f.cid?,
            user: f.user?,
            message: f.message?,
            reaction: f.reaction?,
        },
        t::REACTION_DELETED => EventPayload::ReactionDeleted {
            cid: f.cid?,
            user: f.user?,
            message: f.message?,
            reaction: f.reaction?,
        },
        t::MEMBER_ADDED => EventPayload::MemberAdded {
            cid: f.cid?,
            member: f.member?,
        },
        t::MEMBER_REMOVED => EventPayload::MemberRemoved {
            cid: f.cid?,
            user: f.user?,
        },
        t::CHANNEL_UPDATED => EventPayload::ChannelUpdated {
            cid: f.cid?,
            channel: f.channel?,
            message: f.message,
        },
        t::CHANNEL_DELETED => EventPayload::ChannelDeleted {
            cid: f.cid?,
            channel: f.channel?,
            user: f.user,
        },
        t::CHANNEL_HIDDEN => EventPayload::ChannelHidden {
            cid: f.cid?,
            user: f.user,
            clear_history: f.clear_history.unwrap_or(false),
        },
        t::CHANNEL_VISIBLE => EventPayload::ChannelVisible {
            cid: f.cid?,
            user: f.user?,
        },
        t::CHANNEL_TRUNCATED => EventPayload::ChannelTruncated {
            cid: f.cid?,
            channel: f.channel?,
            user: f.user,
        },
        t::USER_PRESENCE_CHANGED => EventPayload::UserPresenceChanged { user: f.user? },
        t::USER_WATCHING_START => EventPayload::UserStartWatching {
            cid: f.cid?,
            user: f.user?,
            watcher_count: f.watcher_count?,
        },
        t::USER_WATCHING_STOP => EventPayload::UserStopWatching {
            cid: f.cid?,
            user: f.user?,
            watcher_count: f.watcher_count?,
        },
        t::NOTIFICATION_MESSAGE_NEW => EventPayload::NotificationMessageNew {
            cid: f.cid?,
            user: f.user?,
            message: f.message?,
            total_unread_count: f.total_unread_count,
            unread_channels: f.unread_channels,
        },
        t::NOTIFICATION_ADDED_TO_CHANNEL => EventPayload::NotificationAddedToChannel {
            cid: f.cid?,
            channel: f.channel,
        },
        t::NOTIFICATION_REMOVED_FROM_CHANNEL => EventPayload::NotificationRemovedFromChannel {
            cid: f.cid?,
            user: f.user?,
        },
        t::NOTIFICATION_CHANNEL_DELETED => EventPayload::NotificationChannelDeleted {
            cid: f.cid?,
            channel: f.channel?,
            user: f.user,
        },
        t::NOTIFICATION_MARK_READ => EventPayload::NotificationMarkRead {
            cid: f.cid?,
            user: f.user?,
            total_unread_count: f.total_unread_count,
            unread_channels: f.unread_channels,
        },
        _ => return None,
    };
    Some(payload)
}
