//! Message qualification: meaningfulness and allow-list.

use std::collections::HashSet;

use crate::config::WhitelistConfig;
use crate::model::{MessageEvent, MessageType};

/// Why a message event was not dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// No segment with renderable content.
    Empty,
    /// Not in the configured allow-list.
    NotWhitelisted,
}

/// Decides whether message events reach listeners.
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    groups: HashSet<i64>,
    users: HashSet<i64>,
}

impl MessageFilter {
    /// Builds a filter from the allow-list configuration.
    pub fn new(whitelist: &WhitelistConfig) -> Self {
        Self {
            groups: whitelist.groups.iter().copied().collect(),
            users: whitelist.users.iter().copied().collect(),
        }
    }

    /// Whether an allow-list is configured.
    pub fn is_whitelisting(&self) -> bool {
        !self.groups.is_empty() || !self.users.is_empty()
    }

    /// Checks a message event.
    ///
    /// A group message passes the allow-list when its group or its sender is
    /// listed; a private message passes when its sender is listed.
    pub fn check(&self, event: &MessageEvent) -> Result<(), Rejection> {
        if !event.message.iter().any(|s| s.is_meaningful()) {
            return Err(Rejection::Empty);
        }
        if !self.is_whitelisting() {
            return Ok(());
        }
        let allowed = match event.message_type {
            MessageType::Group => {
                event.group_id.is_some_and(|g| self.groups.contains(&g))
                    || self.users.contains(&event.user_id)
            }
            MessageType::Private => self.users.contains(&event.user_id),
        };
        if allowed {
            Ok(())
        } else {
            Err(Rejection::NotWhitelisted)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::GatewayEvent;
    use serde_json::json;

    fn message(message_type: &str, group_id: Option<i64>, user_id: i64, body: serde_json::Value) -> MessageEvent {
        let raw = json!({
            "post_type": "message", "time": 1, "self_id": 9,
            "message_type": message_type, "message_id": 1,
            "user_id": user_id, "group_id": group_id, "message": body
        });
        match GatewayEvent::from_value(raw).unwrap() {
            GatewayEvent::Message(m) => m,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_empty_messages_rejected() {
        let filter = MessageFilter::default();
        let blank = message("private", None, 1, json!([{"type": "text", "data": {"text": "   "}}]));
        assert_eq!(filter.check(&blank), Err(Rejection::Empty));

        let face_only = message("private", None, 1, json!([{"type": "face", "data": {"id": 1}}]));
        assert_eq!(filter.check(&face_only), Err(Rejection::Empty));

        let image = message("private", None, 1, json!([{"type": "image", "data": {"file": "a"}}]));
        assert_eq!(filter.check(&image), Ok(()));
    }

    #[test]
    fn test_whitelist_membership() {
        let filter = MessageFilter::new(&WhitelistConfig {
            groups: vec![100],
            users: vec![7],
        });
        assert!(filter.is_whitelisting());

        assert_eq!(filter.check(&message("group", Some(100), 1, json!("hi"))), Ok(()));
        assert_eq!(filter.check(&message("group", Some(200), 7, json!("hi"))), Ok(()));
        assert_eq!(
            filter.check(&message("group", Some(200), 1, json!("hi"))),
            Err(Rejection::NotWhitelisted)
        );
        assert_eq!(filter.check(&message("private", None, 7, json!("hi"))), Ok(()));
        assert_eq!(
            filter.check(&message("private", None, 8, json!("hi"))),
            Err(Rejection::NotWhitelisted)
        );
    }
}
