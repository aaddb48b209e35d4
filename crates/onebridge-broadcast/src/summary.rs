//! Deterministic text rendering of a [`NormalizedEvent`].
//!
//! ```text
//! [2023-11-14 22:13:20] #42 G:30001 (Rustaceans) group/normal alice(20001)
//! > reply #7 bob(20002): earlier text
//! > [image] old.png
//! look at these
//! [image] a.jpg
//! [image] b.jpg
//! Mentions: bot(10000, self), carol(20003)
//! ```
//!
//! Times are rendered in UTC.

use std::fmt::Write;

use time::OffsetDateTime;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;

use crate::normalize::{Attachment, Attachments, NormalizedEvent};

const TIMESTAMP: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

/// Formats a unix timestamp as `YYYY-MM-DD hh:mm:ss` UTC.
///
/// Out-of-range values fall back to the raw number.
pub fn format_timestamp(unix: i64) -> String {
    OffsetDateTime::from_unix_timestamp(unix)
        .ok()
        .and_then(|t| t.format(TIMESTAMP).ok())
        .unwrap_or_else(|| unix.to_string())
}

/// Renders the summary lines of `event`.
pub fn render(event: &NormalizedEvent) -> String {
    let mut lines = vec![header(event)];

    if let Some(reply) = &event.reply {
        if reply.resolved {
            let sender = match (&reply.sender_name, reply.sender_id) {
                (Some(name), Some(id)) => format!("{name}({id})"),
                (None, Some(id)) => id.to_string(),
                (Some(name), None) => name.clone(),
                (None, None) => "unknown".into(),
            };
            lines.push(format!("> reply #{} {}: {}", reply.message_id, sender, reply.text));
            lines.extend(attachment_lines(&reply.attachments).map(|l| format!("> {l}")));
        } else {
            lines.push(format!("> reply #{} (unavailable)", reply.message_id));
        }
    }

    if !event.text.trim().is_empty() {
        lines.push(event.text.clone());
    }
    lines.extend(attachment_lines(&event.attachments));

    if event.at_all || !event.mentions.is_empty() {
        let mut targets = Vec::new();
        if event.at_all {
            targets.push("everyone".to_string());
        }
        for mention in &event.mentions {
            if mention.is_self {
                targets.push(format!("{}({}, self)", mention.name, mention.user_id));
            } else {
                targets.push(format!("{}({})", mention.name, mention.user_id));
            }
        }
        lines.push(format!("Mentions: {}", targets.join(", ")));
    }

    lines.join("\n")
}

fn header(event: &NormalizedEvent) -> String {
    let mut line = format!(
        "[{}] #{} {}",
        format_timestamp(event.time),
        event.message_id,
        event.conversation_key
    );
    if let Some(name) = &event.group_name {
        let _ = write!(line, " ({name})");
    }
    let _ = write!(line, " {}", event.message_type.as_str());
    if !event.sub_type.is_empty() {
        let _ = write!(line, "/{}", event.sub_type);
    }
    let _ = write!(line, " {}({})", event.sender_name, event.sender_id);
    line
}

fn attachment_lines(attachments: &Attachments) -> impl Iterator<Item = String> + '_ {
    attachments.iter().map(|(label, a)| attachment_line(label, a))
}

fn attachment_line(label: &str, attachment: &Attachment) -> String {
    match &attachment.url {
        Some(url) => format!("[{label}] {} {url}", attachment.file),
        None => format!("[{label}] {}", attachment.file),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::{Mention, QuotedMessage};
    use onebridge_adapter_onebot::MessageType;

    fn event() -> NormalizedEvent {
        NormalizedEvent {
            message_id: 42,
            time: 1_700_000_000,
            self_id: 10000,
            message_type: MessageType::Group,
            sub_type: "normal".into(),
            conversation_key: "G:30001".into(),
            group_id: Some(30001),
            group_name: Some("Rustaceans".into()),
            sender_id: 20001,
            sender_name: "alice".into(),
            sender_role: None,
            text: "look at these".into(),
            attachments: Attachments::default(),
            mentions: Vec::new(),
            at_all: false,
            at_me: false,
            reply: None,
            summary: String::new(),
            context: None,
            raw: None,
        }
    }

    fn image(file: &str) -> Attachment {
        Attachment {
            file: file.into(),
            url: None,
            size: None,
        }
    }

    #[test]
    fn test_two_images_and_one_mention() {
        let mut e = event();
        e.attachments.images = vec![image("a.jpg"), image("b.jpg")];
        e.mentions = vec![Mention {
            user_id: 20003,
            name: "carol".into(),
            is_self: false,
        }];

        let summary = render(&e);
        let lines: Vec<&str> = summary.lines().collect();
        assert_eq!(
            lines[0],
            "[2023-11-14 22:13:20] #42 G:30001 (Rustaceans) group/normal alice(20001)"
        );
        assert_eq!(lines.iter().filter(|l| l.starts_with("[image]")).count(), 2);
        assert_eq!(lines.iter().filter(|l| l.starts_with("Mentions:")).count(), 1);
        assert_eq!(lines[1], "look at these");
        assert_eq!(lines[4], "Mentions: carol(20003)");
    }

    #[test]
    fn test_quote_block_precedes_body() {
        let mut e = event();
        e.text = String::new();
        e.reply = Some(QuotedMessage {
            message_id: 7,
            resolved: true,
            sender_id: Some(20002),
            sender_name: Some("bob".into()),
            text: "earlier text".into(),
            attachments: Attachments {
                images: vec![image("old.png")],
                ..Default::default()
            },
        });
        e.at_all = true;
        e.mentions = vec![Mention {
            user_id: 10000,
            name: "bot".into(),
            is_self: true,
        }];

        let summary = render(&e);
        let lines: Vec<&str> = summary.lines().collect();
        assert_eq!(lines[1], "> reply #7 bob(20002): earlier text");
        assert_eq!(lines[2], "> [image] old.png");
        assert_eq!(lines[3], "Mentions: everyone, bot(10000, self)");
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn test_rendering_is_deterministic() {
        let mut e = event();
        e.reply = Some(QuotedMessage {
            message_id: 9,
            resolved: false,
            sender_id: None,
            sender_name: None,
            text: String::new(),
            attachments: Attachments::default(),
        });
        assert_eq!(render(&e), render(&e));
        assert!(render(&e).contains("> reply #9 (unavailable)"));
    }

    #[test]
    fn test_format_timestamp_utc() {
        assert_eq!(format_timestamp(0), "1970-01-01 00:00:00");
        assert_eq!(format_timestamp(i64::MAX), i64::MAX.to_string());
    }
}
