//! OneBot v11 events.
//!
//! ```text
//! GatewayEvent
//! ├── Message(MessageEvent)   post_type = "message"
//! ├── Notice(NoticeEvent)     post_type = "notice"
//! ├── Request(RequestEvent)   post_type = "request"
//! └── Meta(MetaEvent)         post_type = "meta_event"
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::segment::{Segment, plain_text, segments_or_string};
use crate::error::{FrameError, FrameResult};

/// Event category, the `post_type` discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Chat message.
    Message,
    /// Notice (recall, join, poke, ...).
    Notice,
    /// Friend or group request.
    Request,
    /// Heartbeat or lifecycle.
    Meta,
}

impl EventKind {
    /// The wire discriminant.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Message => "message",
            EventKind::Notice => "notice",
            EventKind::Request => "request",
            EventKind::Meta => "meta_event",
        }
    }
}

/// A classified inbound event.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    /// Message event.
    Message(MessageEvent),
    /// Notice event.
    Notice(NoticeEvent),
    /// Request event.
    Request(RequestEvent),
    /// Meta event.
    Meta(MetaEvent),
}

impl GatewayEvent {
    /// Parses an event object by its `post_type`.
    pub fn from_value(value: Value) -> FrameResult<Self> {
        let post_type = value
            .get("post_type")
            .and_then(Value::as_str)
            .ok_or_else(|| FrameError::UnrecognizedShape("missing post_type".into()))?
            .to_string();

        let malformed = |e: serde_json::Error| FrameError::MalformedEvent {
            post_type: post_type.clone(),
            reason: e.to_string(),
        };

        match post_type.as_str() {
            // `message_sent` is how several gateways report the bot's own messages.
            "message" | "message_sent" => {
                let mut event: MessageEvent =
                    serde_json::from_value(value.clone()).map_err(malformed)?;
                event.raw = value;
                Ok(GatewayEvent::Message(event))
            }
            "notice" => serde_json::from_value(value)
                .map(GatewayEvent::Notice)
                .map_err(malformed),
            "request" => serde_json::from_value(value)
                .map(GatewayEvent::Request)
                .map_err(malformed),
            "meta_event" => serde_json::from_value(value)
                .map(GatewayEvent::Meta)
                .map_err(malformed),
            other => Err(FrameError::UnrecognizedShape(format!(
                "unknown post_type '{other}'"
            ))),
        }
    }

    /// The event category.
    pub fn kind(&self) -> EventKind {
        match self {
            GatewayEvent::Message(_) => EventKind::Message,
            GatewayEvent::Notice(_) => EventKind::Notice,
            GatewayEvent::Request(_) => EventKind::Request,
            GatewayEvent::Meta(_) => EventKind::Meta,
        }
    }

    /// The bot account that received the event.
    pub fn self_id(&self) -> i64 {
        match self {
            GatewayEvent::Message(e) => e.self_id,
            GatewayEvent::Notice(e) => e.self_id,
            GatewayEvent::Request(e) => e.self_id,
            GatewayEvent::Meta(e) => e.self_id,
        }
    }

    /// Unix timestamp in seconds.
    pub fn time(&self) -> i64 {
        match self {
            GatewayEvent::Message(e) => e.time,
            GatewayEvent::Notice(e) => e.time,
            GatewayEvent::Request(e) => e.time,
            GatewayEvent::Meta(e) => e.time,
        }
    }

    /// Returns the message event, if this is one.
    pub fn as_message(&self) -> Option<&MessageEvent> {
        match self {
            GatewayEvent::Message(e) => Some(e),
            _ => None,
        }
    }
}

// ============================================================================
// Message
// ============================================================================

/// Whether a message was sent in a group or privately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// One-to-one conversation.
    Private,
    /// Group conversation.
    Group,
}

impl MessageType {
    /// The wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Private => "private",
            MessageType::Group => "group",
        }
    }
}

/// Message sender information.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Sender {
    /// User ID.
    #[serde(default)]
    pub user_id: Option<i64>,
    /// Nickname.
    #[serde(default)]
    pub nickname: Option<String>,
    /// Group card (group nickname).
    #[serde(default)]
    pub card: Option<String>,
    /// Group role (`owner`, `admin`, `member`).
    #[serde(default)]
    pub role: Option<String>,
}

impl Sender {
    /// Best display name: non-empty card, then nickname.
    pub fn display_name(&self) -> Option<&str> {
        self.card
            .as_deref()
            .filter(|c| !c.is_empty())
            .or(self.nickname.as_deref().filter(|n| !n.is_empty()))
    }
}

/// A chat message event.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageEvent {
    /// Unix timestamp in seconds.
    pub time: i64,
    /// Receiving bot account.
    pub self_id: i64,
    /// Private or group.
    pub message_type: MessageType,
    /// Sub-type (`friend`, `normal`, ...).
    #[serde(default)]
    pub sub_type: String,
    /// Message ID.
    pub message_id: i64,
    /// Sender user ID.
    pub user_id: i64,
    /// Group ID for group messages.
    #[serde(default)]
    pub group_id: Option<i64>,
    /// Ordered segments.
    #[serde(deserialize_with = "segments_or_string")]
    pub message: Vec<Segment>,
    /// Raw message string.
    #[serde(default)]
    pub raw_message: String,
    /// Sender details.
    #[serde(default)]
    pub sender: Sender,
    /// The source object as received.
    #[serde(skip)]
    pub raw: Value,
}

impl MessageEvent {
    /// Concatenated text segments.
    pub fn plain_text(&self) -> String {
        plain_text(&self.message)
    }

    /// Whether this is a group message.
    pub fn is_group(&self) -> bool {
        self.message_type == MessageType::Group
    }

    /// Group ID for group messages, user ID otherwise.
    pub fn conversation_id(&self) -> i64 {
        match self.message_type {
            MessageType::Group => self.group_id.unwrap_or(self.user_id),
            MessageType::Private => self.user_id,
        }
    }

    /// Conversation key: `G:<group>` or `U:<user>`.
    pub fn conversation_key(&self) -> String {
        match self.message_type {
            MessageType::Group => format!("G:{}", self.conversation_id()),
            MessageType::Private => format!("U:{}", self.user_id),
        }
    }
}

// ============================================================================
// Notice / Request / Meta
// ============================================================================

/// A notice event. Type-specific fields stay in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoticeEvent {
    /// Unix timestamp in seconds.
    pub time: i64,
    /// Receiving bot account.
    pub self_id: i64,
    /// Notice type (`group_recall`, `notify`, ...).
    pub notice_type: String,
    /// Sub-type, when present.
    #[serde(default)]
    pub sub_type: Option<String>,
    /// Subject user.
    #[serde(default)]
    pub user_id: Option<i64>,
    /// Group, for group notices.
    #[serde(default)]
    pub group_id: Option<i64>,
    /// Remaining fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A friend or group request event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEvent {
    /// Unix timestamp in seconds.
    pub time: i64,
    /// Receiving bot account.
    pub self_id: i64,
    /// `friend` or `group`.
    pub request_type: String,
    /// Sub-type (`add`, `invite`) for group requests.
    #[serde(default)]
    pub sub_type: Option<String>,
    /// Requesting user.
    pub user_id: i64,
    /// Target group.
    #[serde(default)]
    pub group_id: Option<i64>,
    /// Verification message.
    #[serde(default)]
    pub comment: String,
    /// Opaque flag used to answer the request.
    #[serde(default)]
    pub flag: String,
}

/// A heartbeat or lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaEvent {
    /// Unix timestamp in seconds.
    pub time: i64,
    /// Receiving bot account.
    pub self_id: i64,
    /// `heartbeat` or `lifecycle`.
    pub meta_event_type: String,
    /// Lifecycle sub-type (`connect`, `enable`, `disable`).
    #[serde(default)]
    pub sub_type: Option<String>,
    /// Heartbeat status object.
    #[serde(default)]
    pub status: Option<Value>,
    /// Heartbeat interval in milliseconds.
    #[serde(default)]
    pub interval: Option<i64>,
}

impl MetaEvent {
    /// Whether this is a heartbeat.
    pub fn is_heartbeat(&self) -> bool {
        self.meta_event_type == "heartbeat"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn group_message() -> Value {
        json!({
            "post_type": "message",
            "time": 1700000000,
            "self_id": 42,
            "message_type": "group",
            "sub_type": "normal",
            "message_id": 7,
            "user_id": 1001,
            "group_id": 2002,
            "message": [{"type": "text", "data": {"text": "hi"}}],
            "raw_message": "hi",
            "sender": {"user_id": 1001, "nickname": "alice", "card": "", "role": "member"}
        })
    }

    #[test]
    fn test_parse_group_message() {
        let event = GatewayEvent::from_value(group_message()).unwrap();
        assert_eq!(event.kind(), EventKind::Message);
        let msg = event.as_message().unwrap();
        assert!(msg.is_group());
        assert_eq!(msg.conversation_key(), "G:2002");
        assert_eq!(msg.plain_text(), "hi");
        assert_eq!(msg.sender.display_name(), Some("alice"));
        assert_eq!(msg.raw["message_id"], 7);
    }

    #[test]
    fn test_string_message_body_becomes_text_segment() {
        let mut raw = group_message();
        raw["message"] = json!("plain body");
        raw["message_type"] = json!("private");
        let event = GatewayEvent::from_value(raw).unwrap();
        let msg = event.as_message().unwrap();
        assert_eq!(msg.message, vec![Segment::text("plain body")]);
        assert_eq!(msg.conversation_key(), "U:1001");
    }

    #[test]
    fn test_parse_other_categories() {
        let notice = json!({
            "post_type": "notice", "time": 1, "self_id": 42,
            "notice_type": "group_recall", "group_id": 5, "user_id": 6, "message_id": 9
        });
        match GatewayEvent::from_value(notice).unwrap() {
            GatewayEvent::Notice(n) => {
                assert_eq!(n.notice_type, "group_recall");
                assert_eq!(n.extra["message_id"], 9);
            }
            other => panic!("unexpected {other:?}"),
        }

        let meta = json!({
            "post_type": "meta_event", "time": 1, "self_id": 42,
            "meta_event_type": "heartbeat", "interval": 5000
        });
        let event = GatewayEvent::from_value(meta).unwrap();
        assert_eq!(event.kind(), EventKind::Meta);

        let request = json!({
            "post_type": "request", "time": 1, "self_id": 42,
            "request_type": "friend", "user_id": 3, "comment": "hey", "flag": "f1"
        });
        assert_eq!(
            GatewayEvent::from_value(request).unwrap().kind(),
            EventKind::Request
        );
    }

    #[test]
    fn test_malformed_events_are_classified() {
        let err = GatewayEvent::from_value(json!({"post_type": "bogus"})).unwrap_err();
        assert!(matches!(err, FrameError::UnrecognizedShape(_)));

        let err = GatewayEvent::from_value(json!({"post_type": "message", "time": 1})).unwrap_err();
        assert!(matches!(err, FrameError::MalformedEvent { .. }));
    }
}
