//! Subscriber wire protocol.
//!
//! Server to subscriber:
//!
//! | `type`     | fields                                  |
//! |------------|-----------------------------------------|
//! | `welcome`  | `message`, `time`                       |
//! | `message`  | `data` (a normalized event)             |
//! | `pong`     | `time`                                  |
//! | `result`   | `requestId`, `ok`, `data` or `error`    |
//! | `error`    | `message`                               |
//! | `shutdown` | `time`                                  |
//!
//! Subscriber to server: `ping`, `invoke` (`requestId`, `action`,
//! `params`) and `sdk` (`requestId`, `path`, `args`).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::normalize::NormalizedEvent;

/// Current unix time in seconds.
pub fn now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

/// A frame sent to subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerFrame {
    /// Sent once after connecting.
    Welcome {
        /// Greeting text.
        message: String,
        /// Unix seconds.
        time: i64,
    },
    /// A published event.
    Message {
        /// The normalized record.
        data: Box<NormalizedEvent>,
    },
    /// Answer to `ping`.
    Pong {
        /// Unix seconds.
        time: i64,
    },
    /// Answer to `invoke` / `sdk`.
    Result {
        /// The subscriber-supplied ID, echoed verbatim.
        #[serde(rename = "requestId")]
        request_id: Value,
        /// Whether the call succeeded.
        ok: bool,
        /// Result payload on success.
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
        /// Error text on failure.
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Answer to a frame of unknown type.
    Error {
        /// What went wrong.
        message: String,
    },
    /// Sent to every subscriber when the service stops.
    Shutdown {
        /// Unix seconds.
        time: i64,
    },
}

impl ServerFrame {
    /// A welcome frame stamped now.
    pub fn welcome(message: impl Into<String>) -> Self {
        Self::Welcome {
            message: message.into(),
            time: now(),
        }
    }

    /// A successful result.
    pub fn ok(request_id: Value, data: Value) -> Self {
        Self::Result {
            request_id,
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    /// A failed result.
    pub fn err(request_id: Value, error: impl ToString) -> Self {
        Self::Result {
            request_id,
            ok: false,
            data: None,
            error: Some(error.to_string()),
        }
    }

    /// Serializes the frame.
    pub fn to_text(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// A well-formed subscriber frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientFrame {
    /// Liveness probe.
    Ping,
    /// Raw gateway call.
    Invoke {
        /// Correlation ID chosen by the subscriber.
        #[serde(rename = "requestId", default)]
        request_id: Value,
        /// Gateway action name.
        action: String,
        /// Action parameters.
        #[serde(default)]
        params: Value,
    },
    /// Whitelisted helper call.
    Sdk {
        /// Correlation ID chosen by the subscriber.
        #[serde(rename = "requestId", default)]
        request_id: Value,
        /// Helper path, e.g. `send.group`.
        path: String,
        /// Helper arguments.
        #[serde(default)]
        args: Value,
    },
}

/// Classification of one subscriber frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A frame the service handles.
    Frame(ClientFrame),
    /// Valid JSON with an unsupported `type`.
    UnknownType(String),
    /// An `invoke` or `sdk` frame with missing or mistyped fields. It is
    /// still answered, tagged with whatever `requestId` it carried.
    BadRequest {
        /// The subscriber-supplied ID, or null.
        request_id: Value,
        /// Why the frame was rejected.
        reason: String,
    },
    /// Not JSON, not an object, or no `type`.
    Malformed(String),
}

impl Inbound {
    /// Classifies a text frame.
    pub fn parse(text: &str) -> Self {
        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => return Inbound::Malformed(e.to_string()),
        };
        let Some(kind) = value.get("type").and_then(Value::as_str) else {
            return Inbound::Malformed("missing type".into());
        };
        if !matches!(kind, "ping" | "invoke" | "sdk") {
            return Inbound::UnknownType(kind.to_string());
        }
        let request_id = value.get("requestId").cloned().unwrap_or(Value::Null);
        match serde_json::from_value(value) {
            Ok(frame) => Inbound::Frame(frame),
            Err(e) => Inbound::BadRequest {
                request_id,
                reason: e.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_client_frames() {
        assert_eq!(
            Inbound::parse(r#"{"type":"ping"}"#),
            Inbound::Frame(ClientFrame::Ping)
        );
        assert_eq!(
            Inbound::parse(r#"{"type":"invoke","requestId":"r1","action":"get_status"}"#),
            Inbound::Frame(ClientFrame::Invoke {
                request_id: json!("r1"),
                action: "get_status".into(),
                params: Value::Null,
            })
        );
        assert_eq!(
            Inbound::parse(r#"{"type":"sdk","requestId":3,"path":"login.info"}"#),
            Inbound::Frame(ClientFrame::Sdk {
                request_id: json!(3),
                path: "login.info".into(),
                args: Value::Null,
            })
        );
        assert_eq!(
            Inbound::parse(r#"{"type":"subscribe"}"#),
            Inbound::UnknownType("subscribe".into())
        );
        assert!(matches!(Inbound::parse("nope"), Inbound::Malformed(_)));
        assert!(matches!(Inbound::parse("[1]"), Inbound::Malformed(_)));
        match Inbound::parse(r#"{"type":"invoke","requestId":1}"#) {
            Inbound::BadRequest { request_id, reason } => {
                assert_eq!(request_id, json!(1));
                assert!(reason.contains("action"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            Inbound::parse(r#"{"type":"sdk","path":5}"#),
            Inbound::BadRequest { request_id: Value::Null, .. }
        ));
    }

    #[test]
    fn test_result_frame_shape() {
        let ok = serde_json::to_value(ServerFrame::ok(json!("r1"), json!({"x": 1}))).unwrap();
        assert_eq!(
            ok,
            json!({"type": "result", "requestId": "r1", "ok": true, "data": {"x": 1}})
        );
        let err = serde_json::to_value(ServerFrame::err(json!(2), "boom")).unwrap();
        assert_eq!(
            err,
            json!({"type": "result", "requestId": 2, "ok": false, "error": "boom"})
        );
        let pong = serde_json::to_value(ServerFrame::Pong { time: 5 }).unwrap();
        assert_eq!(pong, json!({"type": "pong", "time": 5}));
    }
}
