//! OneBot v11 message segments.
//!
//! A message is an ordered list of `{type, data}` segments. Recognized types
//! are parsed into typed variants; anything else, including a recognized
//! type whose `data` does not fit, is preserved as [`Segment::Unknown`] so
//! that no part of a message is silently lost.
//!
//! ```rust,ignore
//! use onebridge_adapter_onebot::Segment;
//!
//! let segments = vec![Segment::text("hi "), Segment::at(10001), Segment::face(178)];
//! ```

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value, json};

/// A OneBot v11 message segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawSegment", into = "RawSegment")]
pub enum Segment {
    /// Plain text content.
    Text(TextData),
    /// Built-in emoji/face.
    Face(FaceData),
    /// Image.
    Image(MediaData),
    /// Voice/audio record.
    Record(MediaData),
    /// Video.
    Video(MediaData),
    /// Uploaded file.
    File(MediaData),
    /// Mention of a user or of everyone.
    At(AtData),
    /// Quote of an earlier message.
    Reply(ReplyData),
    /// Merged-forward reference.
    Forward(ForwardData),
    /// Forward node.
    Node(NodeData),
    /// Any other segment type, kept verbatim.
    Unknown {
        /// The `type` discriminant.
        kind: String,
        /// The raw `data` object.
        data: Value,
    },
}

/// Text segment data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextData {
    /// The text.
    pub text: String,
}

/// Face segment data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceData {
    /// Face ID.
    #[serde(deserialize_with = "id_string")]
    pub id: String,
}

/// Shared data for image, record, video and file segments.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MediaData {
    /// File name or identifier.
    #[serde(default)]
    pub file: String,
    /// Download URL, when the gateway provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Local path, when the gateway provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Size in bytes, when known.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "opt_u64_lenient"
    )]
    pub file_size: Option<u64>,
    /// Display summary some gateways attach to images.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Mention segment data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtData {
    /// Target user ID, or `"all"`.
    #[serde(deserialize_with = "id_string")]
    pub qq: String,
    /// Display name some gateways include.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl AtData {
    /// Whether this mentions everyone.
    pub fn is_all(&self) -> bool {
        self.qq == "all"
    }

    /// The mentioned user ID, if this is a valid single-user mention.
    pub fn user_id(&self) -> Option<i64> {
        self.qq.parse().ok()
    }

    /// A mention is valid when it names everyone or a numeric user ID.
    pub fn is_valid(&self) -> bool {
        self.is_all() || self.user_id().is_some()
    }
}

/// Reply segment data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyData {
    /// ID of the quoted message.
    #[serde(deserialize_with = "id_string")]
    pub id: String,
}

/// Forward reference data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForwardData {
    /// Forward ID.
    #[serde(deserialize_with = "id_string")]
    pub id: String,
}

/// Forward node data.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NodeData {
    /// Referenced message ID.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "opt_id_string"
    )]
    pub id: Option<String>,
    /// Custom node sender ID.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "opt_id_string"
    )]
    pub user_id: Option<String>,
    /// Custom node sender name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    /// Custom node content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
}

impl Segment {
    /// Creates a text segment.
    pub fn text(text: impl Into<String>) -> Self {
        Segment::Text(TextData { text: text.into() })
    }

    /// Creates a mention segment.
    pub fn at(user_id: i64) -> Self {
        Segment::At(AtData {
            qq: user_id.to_string(),
            name: None,
        })
    }

    /// Creates a mention-everyone segment.
    pub fn at_all() -> Self {
        Segment::At(AtData {
            qq: "all".into(),
            name: None,
        })
    }

    /// Creates a face segment.
    pub fn face(id: i64) -> Self {
        Segment::Face(FaceData { id: id.to_string() })
    }

    /// Creates an image segment from a file or URL.
    pub fn image(file: impl Into<String>) -> Self {
        Segment::Image(MediaData {
            file: file.into(),
            ..Default::default()
        })
    }

    /// Creates a reply segment.
    pub fn reply(message_id: i64) -> Self {
        Segment::Reply(ReplyData {
            id: message_id.to_string(),
        })
    }

    /// The wire `type` of this segment.
    pub fn kind(&self) -> &str {
        match self {
            Segment::Text(_) => "text",
            Segment::Face(_) => "face",
            Segment::Image(_) => "image",
            Segment::Record(_) => "record",
            Segment::Video(_) => "video",
            Segment::File(_) => "file",
            Segment::At(_) => "at",
            Segment::Reply(_) => "reply",
            Segment::Forward(_) => "forward",
            Segment::Node(_) => "node",
            Segment::Unknown { kind, .. } => kind,
        }
    }

    /// Whether this segment carries content a reader would see.
    ///
    /// Text counts only when it has non-whitespace characters; mentions
    /// count only when they are valid.
    pub fn is_meaningful(&self) -> bool {
        match self {
            Segment::Text(t) => !t.text.trim().is_empty(),
            Segment::Image(_) | Segment::Record(_) | Segment::Video(_) | Segment::File(_) => true,
            Segment::At(at) => at.is_valid(),
            _ => false,
        }
    }
}

/// Concatenates the text segments of a message.
pub fn plain_text(segments: &[Segment]) -> String {
    segments
        .iter()
        .filter_map(|s| match s {
            Segment::Text(t) => Some(t.text.as_str()),
            _ => None,
        })
        .collect()
}

/// Deserializes a `message` field that is either a segment array or a
/// plain string.
pub(crate) fn segments_or_string<'de, D>(deserializer: D) -> Result<Vec<Segment>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Body {
        Segments(Vec<Segment>),
        Text(String),
    }

    Ok(match Body::deserialize(deserializer)? {
        Body::Segments(segments) => segments,
        Body::Text(text) if text.is_empty() => Vec::new(),
        Body::Text(text) => vec![Segment::text(text)],
    })
}

// ============================================================================
// Wire representation
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawSegment {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

fn typed<T: serde::de::DeserializeOwned>(data: &Value) -> Option<T> {
    serde_json::from_value(data.clone()).ok()
}

impl From<RawSegment> for Segment {
    fn from(raw: RawSegment) -> Self {
        let parsed = match raw.kind.as_str() {
            "text" => typed(&raw.data).map(Segment::Text),
            "face" => typed(&raw.data).map(Segment::Face),
            "image" => typed(&raw.data).map(Segment::Image),
            "record" => typed(&raw.data).map(Segment::Record),
            "video" => typed(&raw.data).map(Segment::Video),
            "file" => typed(&raw.data).map(Segment::File),
            "at" => typed(&raw.data).map(Segment::At),
            "reply" => typed(&raw.data).map(Segment::Reply),
            "forward" => typed(&raw.data).map(Segment::Forward),
            "node" => typed(&raw.data).map(Segment::Node),
            _ => None,
        };
        parsed.unwrap_or(Segment::Unknown {
            kind: raw.kind,
            data: raw.data,
        })
    }
}

impl From<Segment> for RawSegment {
    fn from(segment: Segment) -> Self {
        let kind = segment.kind().to_string();
        let data = match segment {
            Segment::Text(d) => serde_json::to_value(d),
            Segment::Face(d) => serde_json::to_value(d),
            Segment::Image(d) | Segment::Record(d) | Segment::Video(d) | Segment::File(d) => {
                serde_json::to_value(d)
            }
            Segment::At(d) => serde_json::to_value(d),
            Segment::Reply(d) => serde_json::to_value(d),
            Segment::Forward(d) => serde_json::to_value(d),
            Segment::Node(d) => serde_json::to_value(d),
            Segment::Unknown { data, .. } => Ok(data),
        };
        RawSegment {
            kind,
            data: data.unwrap_or_else(|_| Value::Object(Map::new())),
        }
    }
}

// ============================================================================
// Lenient ID helpers
// ============================================================================

/// Gateways disagree on whether IDs are numbers or strings.
fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}

fn opt_id_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn opt_u64_lenient<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    })
}

/// Serializes segments back to their wire form.
pub fn to_wire(segments: &[Segment]) -> Value {
    serde_json::to_value(segments).unwrap_or_else(|_| json!([]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_segments() {
        let raw = json!([
            {"type": "text", "data": {"text": "hello "}},
            {"type": "at", "data": {"qq": 10001}},
            {"type": "image", "data": {"file": "a.png", "url": "http://x/a.png", "file_size": "2048"}},
            {"type": "reply", "data": {"id": "-12345"}},
        ]);
        let segments: Vec<Segment> = serde_json::from_value(raw).unwrap();

        assert_eq!(segments[0], Segment::text("hello "));
        assert!(matches!(&segments[1], Segment::At(at) if at.user_id() == Some(10001)));
        match &segments[2] {
            Segment::Image(img) => {
                assert_eq!(img.url.as_deref(), Some("http://x/a.png"));
                assert_eq!(img.file_size, Some(2048));
            }
            other => panic!("expected image, got {other:?}"),
        }
        assert!(matches!(&segments[3], Segment::Reply(r) if r.id == "-12345"));
    }

    #[test]
    fn test_unknown_segment_is_preserved() {
        let raw = json!({"type": "dice", "data": {"result": 6}});
        let segment: Segment = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(segment.kind(), "dice");
        assert_eq!(serde_json::to_value(&segment).unwrap(), raw);
    }

    #[test]
    fn test_known_type_with_bad_data_falls_back_to_unknown() {
        let segment: Segment =
            serde_json::from_value(json!({"type": "at", "data": {"name": "x"}})).unwrap();
        assert!(matches!(segment, Segment::Unknown { ref kind, .. } if kind == "at"));
        assert!(!segment.is_meaningful());
    }

    #[test]
    fn test_meaningfulness() {
        assert!(!Segment::text("  \n").is_meaningful());
        assert!(Segment::text(" x ").is_meaningful());
        assert!(Segment::image("a.png").is_meaningful());
        assert!(Segment::at_all().is_meaningful());
        assert!(!Segment::face(1).is_meaningful());
        assert!(!Segment::reply(1).is_meaningful());

        let bad_at = Segment::At(AtData {
            qq: "nobody".into(),
            name: None,
        });
        assert!(!bad_at.is_meaningful());
    }

    #[test]
    fn test_plain_text_joins_text_segments() {
        let segments = vec![Segment::text("a"), Segment::at(1), Segment::text("b")];
        assert_eq!(plain_text(&segments), "ab");
    }
}
