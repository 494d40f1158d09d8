//! Channel-collection reconciliation decisions.
//!
//! For every inbound event and every active channel-list query, a handler
//! decides whether the query's channel set changes. Decisions are pure:
//! the caller owns the cache and applies the result.

use driftline_core::{ChatEvent, Channel, EventPayload, FilterObject};

/// What a channel-list query should do with an event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventHandlingResult {
    /// Add this channel payload to the query result.
    Add(Channel),
    /// The channel belongs in the result but no payload is at hand:
    /// watch the cid, then add what the watch returns.
    WatchAndAdd(String),
    /// Remove the channel with this cid from the query result.
    Remove(String),
    /// No change.
    Skip,
}

/// Per-query event reconciliation policy.
///
/// `handle` is called once per event per active query. `filter` is the
/// query's filter object; the default policy ignores it, custom policies
/// may match against it. `cached_channel` is the query's current entry
/// for the event's cid, if any.
pub trait ChatEventHandler: Send + Sync {
    fn handle(
        &self,
        event: &ChatEvent,
        filter: &FilterObject,
        cached_channel: Option<&Channel>,
    ) -> EventHandlingResult;
}

/// Membership-driven default policy.
///
/// Only events that clearly prove or revoke the current user's membership
/// move channels in or out; everything else is a skip, so a misbehaving
/// event can never corrupt a query result.
pub struct DefaultChatEventHandler {
    pub current_user_id: String,
}

impl DefaultChatEventHandler {
    pub fn new(current_user_id: impl Into<String>) -> Self {
        Self {
            current_user_id: current_user_id.into(),
        }
    }

    fn on_new_message(
        cid: &str,
        message: &driftline_core::Message,
        cached_channel: Option<&Channel>,
    ) -> EventHandlingResult {
        // system messages never surface a channel into a query result
        if message.is_system() {
            return EventHandlingResult::Skip;
        }
        if cached_channel.is_some() {
            EventHandlingResult::Skip
        } else {
            EventHandlingResult::WatchAndAdd(cid.to_string())
        }
    }
}

impl ChatEventHandler for DefaultChatEventHandler {
    fn handle(
        &self,
        event: &ChatEvent,
        _filter: &FilterObject,
        cached_channel: Option<&Channel>,
    ) -> EventHandlingResult {
        let me = self.current_user_id.as_str();
        match &event.payload {
            EventPayload::MemberAdded { member, .. } if member.user.id == me => {
                // member events carry no channel payload; without a cached
                // entry there is nothing safe to add
                match cached_channel {
                    Some(channel) => EventHandlingResult::Add(channel.clone()),
                    None => EventHandlingResult::Skip,
                }
            }
            EventPayload::NotificationAddedToChannel { cid, channel } => match channel {
                Some(channel) => EventHandlingResult::Add(channel.clone()),
                None => match cached_channel {
                    Some(cached) => EventHandlingResult::Add(cached.clone()),
                    // the notification itself proves membership
                    None => EventHandlingResult::WatchAndAdd(cid.clone()),
                },
            },
            EventPayload::ChannelVisible { cid, .. } => match cached_channel {
                Some(channel) => EventHandlingResult::Add(channel.clone()),
                None => EventHandlingResult::WatchAndAdd(cid.clone()),
            },
            EventPayload::MemberRemoved { cid, user } if user.id == me => {
                EventHandlingResult::Remove(cid.clone())
            }
            EventPayload::NotificationRemovedFromChannel { cid, user } if user.id == me => {
                EventHandlingResult::Remove(cid.clone())
            }
            EventPayload::ChannelHidden { cid, .. }
            | EventPayload::ChannelDeleted { cid, .. }
            | EventPayload::NotificationChannelDeleted { cid, .. } => {
                EventHandlingResult::Remove(cid.clone())
            }
            EventPayload::NewMessage { cid, message, .. }
            | EventPayload::NotificationMessageNew { cid, message, .. } => {
                Self::on_new_message(cid, message, cached_channel)
            }
            _ => EventHandlingResult::Skip,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftline_core::{Member, Message, User, MESSAGE_TYPE_SYSTEM};
    use serde_json::json;

    const CID: &str = "messaging:general";
    const ME: &str = "me";

    fn handler() -> DefaultChatEventHandler {
        DefaultChatEventHandler::new(ME)
    }

    fn filter() -> FilterObject {
        FilterObject::default()
    }

    fn cached() -> Channel {
        Channel {
            cid: CID.into(),
            id: "general".into(),
            channel_type: "messaging".into(),
            ..Channel::default()
        }
    }

    fn event(payload: EventPayload) -> ChatEvent {
        let mut event = ChatEvent::disconnected();
        event.payload = payload;
        event
    }

    #[test]
    fn test_unknown_event_is_skipped() {
        let ev = event(EventPayload::Unknown {
            raw: json!({"type": "totally.new"}),
        });
        assert_eq!(
            handler().handle(&ev, &filter(), None),
            EventHandlingResult::Skip
        );
        assert_eq!(
            handler().handle(&ev, &filter(), Some(&cached())),
            EventHandlingResult::Skip
        );
    }

    #[test]
    fn test_member_added_for_current_user() {
        let ev = event(EventPayload::MemberAdded {
            cid: CID.into(),
            member: Member {
                user: User::new(ME),
            },
        });
        // no cached channel and no payload: nothing safe to add
        assert_eq!(
            handler().handle(&ev, &filter(), None),
            EventHandlingResult::Skip
        );
        assert_eq!(
            handler().handle(&ev, &filter(), Some(&cached())),
            EventHandlingResult::Add(cached())
        );
    }

    #[test]
    fn test_member_added_for_other_user_is_skipped() {
        let ev = event(EventPayload::MemberAdded {
            cid: CID.into(),
            member: Member {
                user: User::new("somebody-else"),
            },
        });
        assert_eq!(
            handler().handle(&ev, &filter(), Some(&cached())),
            EventHandlingResult::Skip
        );
    }

    #[test]
    fn test_notification_added_prefers_embedded_channel() {
        let with_payload = event(EventPayload::NotificationAddedToChannel {
            cid: CID.into(),
            channel: Some(cached()),
        });
        assert_eq!(
            handler().handle(&with_payload, &filter(), None),
            EventHandlingResult::Add(cached())
        );

        let without_payload = event(EventPayload::NotificationAddedToChannel {
            cid: CID.into(),
            channel: None,
        });
        assert_eq!(
            handler().handle(&without_payload, &filter(), None),
            EventHandlingResult::WatchAndAdd(CID.into())
        );
    }

    #[test]
    fn test_removal_events() {
        let removed = event(EventPayload::MemberRemoved {
            cid: CID.into(),
            user: User::new(ME),
        });
        assert_eq!(
            handler().handle(&removed, &filter(), Some(&cached())),
            EventHandlingResult::Remove(CID.into())
        );

        let other_removed = event(EventPayload::MemberRemoved {
            cid: CID.into(),
            user: User::new("somebody-else"),
        });
        assert_eq!(
            handler().handle(&other_removed, &filter(), Some(&cached())),
            EventHandlingResult::Skip
        );

        let hidden = event(EventPayload::ChannelHidden {
            cid: CID.into(),
            user: None,
            clear_history: false,
        });
        assert_eq!(
            handler().handle(&hidden, &filter(), None),
            EventHandlingResult::Remove(CID.into())
        );
    }

    #[test]
    fn test_channel_visible_restores_cache_or_watches() {
        let ev = event(EventPayload::ChannelVisible {
            cid: CID.into(),
            user: User::new("somebody"),
        });
        assert_eq!(
            handler().handle(&ev, &filter(), Some(&cached())),
            EventHandlingResult::Add(cached())
        );
        assert_eq!(
            handler().handle(&ev, &filter(), None),
            EventHandlingResult::WatchAndAdd(CID.into())
        );
    }

    #[test]
    fn test_removal_notifications() {
        let removed = event(EventPayload::NotificationRemovedFromChannel {
            cid: CID.into(),
            user: User::new(ME),
        });
        assert_eq!(
            handler().handle(&removed, &filter(), Some(&cached())),
            EventHandlingResult::Remove(CID.into())
        );

        let other_removed = event(EventPayload::NotificationRemovedFromChannel {
            cid: CID.into(),
            user: User::new("somebody-else"),
        });
        assert_eq!(
            handler().handle(&other_removed, &filter(), Some(&cached())),
            EventHandlingResult::Skip
        );

        let deleted = event(EventPayload::NotificationChannelDeleted {
            cid: CID.into(),
            channel: cached(),
            user: None,
        });
        assert_eq!(
            handler().handle(&deleted, &filter(), None),
            EventHandlingResult::Remove(CID.into())
        );
    }

    #[test]
    fn test_new_message_surfaces_uncached_channel() {
        let ev = event(EventPayload::NewMessage {
            cid: CID.into(),
            user: User::new("somebody"),
            message: Message {
                id: "m1".into(),
                message_type: "regular".into(),
                ..Message::default()
            },
            watcher_count: None,
            total_unread_count: None,
            unread_channels: None,
        });
        assert_eq!(
            handler().handle(&ev, &filter(), None),
            EventHandlingResult::WatchAndAdd(CID.into())
        );
        assert_eq!(
            handler().handle(&ev, &filter(), Some(&cached())),
            EventHandlingResult::Skip
        );
    }

    #[test]
    fn test_system_message_is_always_skipped() {
        let ev = event(EventPayload::NewMessage {
            cid: CID.into(),
            user: User::new("somebody"),
            message: Message {
                id: "m1".into(),
                message_type: MESSAGE_TYPE_SYSTEM.into(),
                ..Message::default()
            },
            watcher_count: None,
            total_unread_count: None,
            unread_channels: None,
        });
        assert_eq!(
            handler().handle(&ev, &filter(), None),
            EventHandlingResult::Skip
        );
        assert_eq!(
            handler().handle(&ev, &filter(), Some(&cached())),
            EventHandlingResult::Skip
        );
    }
}
