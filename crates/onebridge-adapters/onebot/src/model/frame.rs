//! Request, response and inbound frame classification.

use serde::Serialize;
use serde_json::Value;

use onebridge_core::ApiError;

use super::event::GatewayEvent;
use crate::error::{FrameError, FrameResult};

/// Outbound request frame: `{action, params, echo}`.
#[derive(Debug, Clone, Serialize)]
pub struct ApiRequest<'a> {
    /// Action name.
    pub action: &'a str,
    /// Action parameters.
    pub params: &'a Value,
    /// Correlation token.
    pub echo: &'a str,
}

/// Inbound response frame.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    /// Correlation token.
    pub echo: String,
    /// `ok`, `async` or `failed`.
    pub status: String,
    /// Gateway return code.
    pub retcode: i64,
    /// The full response object.
    pub raw: Value,
}

impl ApiResponse {
    /// Builds a response view over a frame that carries an `echo`.
    ///
    /// Gateways echo the token back in whatever JSON type it was sent;
    /// numeric tokens are normalized to their decimal string.
    pub fn from_value(raw: Value) -> Option<Self> {
        let echo = match raw.get("echo")? {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        let status = raw
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("ok")
            .to_string();
        let retcode = raw.get("retcode").and_then(Value::as_i64).unwrap_or(0);
        Some(Self {
            echo,
            status,
            retcode,
            raw,
        })
    }

    /// Whether the gateway reported failure.
    pub fn is_failure(&self) -> bool {
        self.status == "failed" || self.retcode != 0
    }

    /// The gateway's error text, from `message`, `msg` or `wording`.
    pub fn error_message(&self) -> String {
        ["message", "msg", "wording"]
            .iter()
            .filter_map(|k| self.raw.get(*k).and_then(Value::as_str))
            .find(|m| !m.is_empty())
            .unwrap_or("unknown gateway error")
            .to_string()
    }

    /// Converts to the call outcome: the full response object on success.
    pub fn into_result(self) -> Result<Value, ApiError> {
        if self.is_failure() {
            Err(ApiError::Failed {
                retcode: self.retcode,
                message: self.error_message(),
            })
        } else {
            Ok(self.raw)
        }
    }

    /// The `data` payload of the response.
    pub fn data(&self) -> &Value {
        self.raw.get("data").unwrap_or(&Value::Null)
    }
}

/// A classified inbound frame.
#[derive(Debug, Clone)]
pub enum InboundFrame {
    /// A response to an outbound call.
    Response(ApiResponse),
    /// An event.
    Event(GatewayEvent),
}

impl InboundFrame {
    /// Classifies a text frame.
    ///
    /// Anything carrying a non-null `echo` is a response; anything with a
    /// `post_type` is an event.
    pub fn parse(text: &str) -> FrameResult<Self> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| FrameError::InvalidJson(e.to_string()))?;
        if !value.is_object() {
            return Err(FrameError::UnrecognizedShape("frame is not an object".into()));
        }

        if value.get("echo").is_some_and(|e| !e.is_null()) {
            return ApiResponse::from_value(value)
                .map(InboundFrame::Response)
                .ok_or_else(|| FrameError::UnrecognizedShape("echo is not a string or number".into()));
        }

        if value.get("post_type").is_some() {
            return GatewayEvent::from_value(value).map(InboundFrame::Event);
        }

        Err(FrameError::UnrecognizedShape(
            "neither echo nor post_type present".into(),
        ))
    }
}

/// Extracts the `data` field from a full response object.
pub fn response_data(response: Value) -> Value {
    match response {
        Value::Object(mut map) => map.remove("data").unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_frame_shape() {
        let params = json!({"user_id": 1});
        let request = ApiRequest {
            action: "get_stranger_info",
            params: &params,
            echo: "tok",
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"action": "get_stranger_info", "params": {"user_id": 1}, "echo": "tok"})
        );
    }

    #[test]
    fn test_classify_response_and_event() {
        let frame = InboundFrame::parse(r#"{"status":"ok","retcode":0,"data":{"a":1},"echo":"t1"}"#)
            .unwrap();
        match frame {
            InboundFrame::Response(r) => {
                assert_eq!(r.echo, "t1");
                assert_eq!(r.data()["a"], 1);
                assert!(!r.is_failure());
            }
            other => panic!("unexpected {other:?}"),
        }

        let frame = InboundFrame::parse(r#"{"status":"ok","retcode":0,"echo":17}"#).unwrap();
        assert!(matches!(frame, InboundFrame::Response(r) if r.echo == "17"));

        let frame = InboundFrame::parse(
            r#"{"post_type":"meta_event","time":1,"self_id":2,"meta_event_type":"heartbeat"}"#,
        )
        .unwrap();
        assert!(matches!(frame, InboundFrame::Event(_)));
    }

    #[test]
    fn test_malformed_frames() {
        assert!(matches!(
            InboundFrame::parse("not json"),
            Err(FrameError::InvalidJson(_))
        ));
        assert!(matches!(
            InboundFrame::parse("[1,2]"),
            Err(FrameError::UnrecognizedShape(_))
        ));
        assert!(matches!(
            InboundFrame::parse(r#"{"hello":"world"}"#),
            Err(FrameError::UnrecognizedShape(_))
        ));
    }

    #[test]
    fn test_failure_response_maps_to_failed() {
        let response = ApiResponse::from_value(
            json!({"status":"failed","retcode":1404,"msg":"no such message","echo":"x"}),
        )
        .unwrap();
        match response.into_result() {
            Err(ApiError::Failed { retcode, message }) => {
                assert_eq!(retcode, 1404);
                assert_eq!(message, "no such message");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_response_data_extraction() {
        assert_eq!(response_data(json!({"data": {"x": 1}})), json!({"x": 1}));
        assert_eq!(response_data(json!({"status": "ok"})), Value::Null);
    }
}
