//! Flattened projection of message events.
//!
//! [`Normalizer::normalize`] issues every enrichment lookup for one event
//! concurrently and joins them before the record is built, so a published
//! record is always complete. Each lookup runs under its own deadline and
//! degrades to a fallback value on failure.

use std::future::Future;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tokio::time::timeout;
use tracing::debug;

use onebridge_adapter_onebot::model::{MediaData, MessageInfo, plain_text};
use onebridge_adapter_onebot::{MessageEvent, MessageType, OneBotClient, Segment};
use onebridge_core::ApiResult;

use crate::summary;

/// One attached media item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attachment {
    /// File name or identifier.
    pub file: String,
    /// Download URL, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Size in bytes, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl From<&MediaData> for Attachment {
    fn from(media: &MediaData) -> Self {
        Self {
            file: media.file.clone(),
            url: media.url.clone(),
            size: media.file_size,
        }
    }
}

/// Attachments grouped by type, each in message order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Attachments {
    /// Images.
    pub images: Vec<Attachment>,
    /// Voice records.
    pub records: Vec<Attachment>,
    /// Videos.
    pub videos: Vec<Attachment>,
    /// Files.
    pub files: Vec<Attachment>,
    /// Merged-forward references.
    pub forwards: Vec<Attachment>,
}

impl Attachments {
    /// Collects the attachments of a segment list.
    pub fn collect(segments: &[Segment]) -> Self {
        let mut out = Self::default();
        for segment in segments {
            match segment {
                Segment::Image(m) => out.images.push(m.into()),
                Segment::Record(m) => out.records.push(m.into()),
                Segment::Video(m) => out.videos.push(m.into()),
                Segment::File(m) => out.files.push(m.into()),
                Segment::Forward(f) => out.forwards.push(Attachment {
                    file: f.id.clone(),
                    url: None,
                    size: None,
                }),
                _ => {}
            }
        }
        out
    }

    /// Every attachment with its type label, grouped in a fixed order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Attachment)> {
        let groups: [(&'static str, &Vec<Attachment>); 5] = [
            ("image", &self.images),
            ("record", &self.records),
            ("video", &self.videos),
            ("file", &self.files),
            ("forward", &self.forwards),
        ];
        groups
            .into_iter()
            .flat_map(|(label, items)| items.iter().map(move |a| (label, a)))
    }

    /// Total number of attachments.
    pub fn len(&self) -> usize {
        self.images.len()
            + self.records.len()
            + self.videos.len()
            + self.files.len()
            + self.forwards.len()
    }

    /// Whether there are no attachments.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A mentioned user.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Mention {
    /// Mentioned user ID.
    pub user_id: i64,
    /// Display name, or the ID when no name could be resolved.
    pub name: String,
    /// Whether the bot itself was mentioned.
    pub is_self: bool,
}

/// The quoted message of a reply.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotedMessage {
    /// Quoted message ID.
    pub message_id: i64,
    /// False when the lookup failed and only the ID is known.
    pub resolved: bool,
    /// Quoted sender ID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<i64>,
    /// Quoted sender display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    /// Quoted plain text.
    pub text: String,
    /// Quoted attachments.
    pub attachments: Attachments,
}

impl QuotedMessage {
    fn unresolved(message_id: i64) -> Self {
        Self {
            message_id,
            resolved: false,
            sender_id: None,
            sender_name: None,
            text: String::new(),
            attachments: Attachments::default(),
        }
    }

    fn from_info(message_id: i64, info: &MessageInfo) -> Self {
        Self {
            message_id,
            resolved: true,
            sender_id: info.sender.user_id,
            sender_name: info.sender.display_name().map(str::to_string),
            text: plain_text(&info.message),
            attachments: Attachments::collect(&info.message),
        }
    }
}

/// A message event flattened for subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedEvent {
    /// Message ID.
    pub message_id: i64,
    /// Unix timestamp in seconds.
    pub time: i64,
    /// Receiving bot account.
    pub self_id: i64,
    /// Private or group.
    pub message_type: MessageType,
    /// Gateway sub-type.
    pub sub_type: String,
    /// `G:<group>` or `U:<user>`.
    pub conversation_key: String,
    /// Group ID for group messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<i64>,
    /// Resolved group name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    /// Sender user ID.
    pub sender_id: i64,
    /// Sender display name, or the ID.
    pub sender_name: String,
    /// Sender group role.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_role: Option<String>,
    /// Concatenated text.
    pub text: String,
    /// Attachments by type.
    pub attachments: Attachments,
    /// Mentioned users, in message order without repeats.
    pub mentions: Vec<Mention>,
    /// Whether everyone was mentioned.
    pub at_all: bool,
    /// Whether the bot was mentioned.
    pub at_me: bool,
    /// Quoted message, when this is a reply.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<QuotedMessage>,
    /// Multi-line human-readable rendering.
    pub summary: String,
    /// Caller-supplied context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    /// Source event object.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
}

/// Builds [`NormalizedEvent`]s, enriching them through gateway lookups.
#[derive(Clone)]
pub struct Normalizer {
    client: OneBotClient,
    lookup_timeout: Duration,
    include_raw: bool,
}

impl Normalizer {
    /// Creates a normalizer issuing lookups through `client`.
    pub fn new(client: OneBotClient, lookup_timeout: Duration, include_raw: bool) -> Self {
        Self {
            client,
            lookup_timeout,
            include_raw,
        }
    }

    /// Normalizes one message event.
    pub async fn normalize(&self, event: &MessageEvent, context: Option<Value>) -> NormalizedEvent {
        let mentioned = mentioned_users(&event.message);
        let reply_id = event.message.iter().find_map(|s| match s {
            Segment::Reply(r) => r.id.parse::<i64>().ok(),
            _ => None,
        });

        let (group_name, mentions, reply) = tokio::join!(
            self.group_name(event),
            join_all(
                mentioned
                    .iter()
                    .map(|(user_id, name)| self.mention(event, *user_id, name.as_deref()))
            ),
            self.quoted(reply_id),
        );

        let mut normalized = NormalizedEvent {
            message_id: event.message_id,
            time: event.time,
            self_id: event.self_id,
            message_type: event.message_type,
            sub_type: event.sub_type.clone(),
            conversation_key: event.conversation_key(),
            group_id: event.group_id,
            group_name,
            sender_id: event.user_id,
            sender_name: event
                .sender
                .display_name()
                .map(str::to_string)
                .unwrap_or_else(|| event.user_id.to_string()),
            sender_role: event.sender.role.clone().filter(|r| !r.is_empty()),
            text: event.plain_text(),
            attachments: Attachments::collect(&event.message),
            at_me: mentions.iter().any(|m| m.is_self),
            mentions,
            at_all: event
                .message
                .iter()
                .any(|s| matches!(s, Segment::At(at) if at.is_all())),
            reply,
            summary: String::new(),
            context,
            raw: self.include_raw.then(|| event.raw.clone()),
        };
        normalized.summary = summary::render(&normalized);
        normalized
    }

    async fn group_name(&self, event: &MessageEvent) -> Option<String> {
        let group_id = event.group_id.filter(|_| event.is_group())?;
        self.lookup("group_info", self.client.get_group_info(group_id, false))
            .await
            .map(|info| info.group_name)
            .filter(|name| !name.is_empty())
    }

    async fn mention(&self, event: &MessageEvent, user_id: i64, given: Option<&str>) -> Mention {
        let is_self = user_id == event.self_id;
        let name = match given.filter(|n| !n.is_empty()) {
            Some(name) => Some(name.to_string()),
            None => match event.group_id.filter(|_| event.is_group()) {
                Some(group_id) => self
                    .lookup(
                        "group_member",
                        self.client.get_group_member_info(group_id, user_id, false),
                    )
                    .await
                    .map(|m| m.display_name().to_string()),
                None => self
                    .lookup("stranger", self.client.get_stranger_info(user_id, false))
                    .await
                    .map(|s| s.nickname),
            },
        };
        Mention {
            user_id,
            name: name
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| user_id.to_string()),
            is_self,
        }
    }

    async fn quoted(&self, reply_id: Option<i64>) -> Option<QuotedMessage> {
        let message_id = reply_id?;
        Some(
            match self.lookup("quoted_message", self.client.get_msg(message_id)).await {
                Some(info) => QuotedMessage::from_info(message_id, &info),
                None => QuotedMessage::unresolved(message_id),
            },
        )
    }

    /// Runs one lookup under the lookup deadline. Failures become `None`.
    async fn lookup<T>(
        &self,
        what: &'static str,
        call: impl Future<Output = ApiResult<T>>,
    ) -> Option<T> {
        match timeout(self.lookup_timeout, call).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                debug!(lookup = what, error = %e, "Lookup failed, using fallback");
                None
            }
            Err(_) => {
                debug!(lookup = what, "Lookup timed out, using fallback");
                None
            }
        }
    }
}

/// Mentioned user IDs in message order, first occurrence only, with any
/// name the gateway already supplied.
fn mentioned_users(segments: &[Segment]) -> Vec<(i64, Option<String>)> {
    let mut out: Vec<(i64, Option<String>)> = Vec::new();
    for segment in segments {
        let Segment::At(at) = segment else { continue };
        if let Some(user_id) = at.user_id() {
            if !out.iter().any(|(id, _)| *id == user_id) {
                out.push((user_id, at.name.clone()));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use onebridge_adapter_onebot::{ApiCaller, GatewayEvent};
    use onebridge_core::ApiError;
    use serde_json::json;

    /// Answers lookups from a table; `get_msg` always fails.
    #[derive(Default)]
    struct Lookups {
        calls: AtomicUsize,
        stall: bool,
    }

    #[async_trait]
    impl ApiCaller for Lookups {
        async fn call_with_timeout(
            &self,
            action: &str,
            params: Value,
            _timeout: Option<Duration>,
        ) -> ApiResult<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.stall {
                std::future::pending::<()>().await;
            }
            let data = match action {
                "get_group_info" => json!({"group_id": params["group_id"], "group_name": "Rustaceans"}),
                "get_group_member_info" => json!({
                    "group_id": params["group_id"], "user_id": params["user_id"],
                    "nickname": format!("nick{}", params["user_id"]), "card": ""
                }),
                _ => return Err(ApiError::Failed { retcode: 1400, message: "not found".into() }),
            };
            Ok(json!({"status": "ok", "retcode": 0, "data": data}))
        }
    }

    fn group_event(message: Value) -> MessageEvent {
        let value = json!({
            "post_type": "message", "message_type": "group", "sub_type": "normal",
            "time": 1_700_000_000, "self_id": 10000, "message_id": 42,
            "user_id": 20001, "group_id": 30001,
            "sender": {"user_id": 20001, "nickname": "alice", "role": "member"},
            "message": message
        });
        match GatewayEvent::from_value(value).unwrap() {
            GatewayEvent::Message(m) => m,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_normalize_resolves_and_falls_back() {
        let lookups = Arc::new(Lookups::default());
        let normalizer = Normalizer::new(
            OneBotClient::new(lookups.clone()),
            Duration::from_secs(1),
            true,
        );
        let event = group_event(json!([
            {"type": "reply", "data": {"id": "7"}},
            {"type": "at", "data": {"qq": "10000"}},
            {"type": "at", "data": {"qq": "20002"}},
            {"type": "at", "data": {"qq": "20002"}},
            {"type": "text", "data": {"text": "look"}},
            {"type": "image", "data": {"file": "a.jpg", "url": "http://img/a"}},
        ]));

        let n = normalizer.normalize(&event, Some(json!({"k": 1}))).await;
        assert_eq!(n.group_name.as_deref(), Some("Rustaceans"));
        assert_eq!(n.sender_name, "alice");
        assert_eq!(n.text, "look");
        assert_eq!(n.mentions.len(), 2);
        assert!(n.mentions[0].is_self);
        assert_eq!(n.mentions[1].name, "nick20002");
        assert!(n.at_me);
        assert!(!n.at_all);
        assert_eq!(n.attachments.images[0].url.as_deref(), Some("http://img/a"));
        // get_msg fails: only the ID survives.
        assert_eq!(n.reply, Some(QuotedMessage::unresolved(7)));
        assert_eq!(n.context, Some(json!({"k": 1})));
        assert_eq!(n.raw.as_ref().unwrap()["message_id"], 42);
        // group info + two members + quoted message
        assert_eq!(lookups.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_lookups_time_out_to_fallbacks() {
        let lookups = Arc::new(Lookups {
            stall: true,
            ..Default::default()
        });
        let normalizer = Normalizer::new(
            OneBotClient::new(lookups.clone()),
            Duration::from_millis(200),
            false,
        );
        let event = group_event(json!([{"type": "at", "data": {"qq": "20002"}}]));

        let started = tokio::time::Instant::now();
        let n = normalizer.normalize(&event, None).await;
        // Lookups run concurrently, so the wait is one deadline, not two.
        assert!(started.elapsed() < Duration::from_millis(400));
        assert_eq!(n.group_name, None);
        assert_eq!(n.mentions[0].name, "20002");
        assert!(n.raw.is_none());
    }

    #[tokio::test]
    async fn test_gateway_supplied_names_skip_lookups() {
        let lookups = Arc::new(Lookups::default());
        let normalizer = Normalizer::new(
            OneBotClient::new(lookups.clone()),
            Duration::from_secs(1),
            false,
        );
        let mut event = group_event(json!([
            {"type": "at", "data": {"qq": "20002", "name": "bob"}},
            {"type": "at", "data": {"qq": "all"}},
        ]));
        event.message_type = MessageType::Private;
        event.group_id = None;

        let n = normalizer.normalize(&event, None).await;
        assert_eq!(n.mentions[0].name, "bob");
        assert!(n.at_all);
        assert_eq!(n.conversation_key, "U:20001");
        assert_eq!(lookups.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_attachments_grouped_in_fixed_order() {
        let attachments = Attachments::collect(&[
            Segment::image("b.png"),
            Segment::Video(MediaData {
                file: "v.mp4".into(),
                ..Default::default()
            }),
            Segment::image("c.png"),
        ]);
        let labels: Vec<_> = attachments.iter().map(|(l, a)| (l, a.file.as_str())).collect();
        assert_eq!(
            labels,
            vec![("image", "b.png"), ("image", "c.png"), ("video", "v.mp4")]
        );
        assert_eq!(attachments.len(), 3);
    }
}
