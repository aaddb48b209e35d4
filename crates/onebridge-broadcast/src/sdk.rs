//! Helper calls subscribers may request by path.
//!
//! Paths: `send.group`, `send.private`, `message.get`, `message.recall`,
//! `user.info`, `group.info`, `group.member`, `login.info`.
//!
//! Arguments come as a JSON object. IDs may be numbers or numeric strings;
//! `message` may be a plain string or a segment array.

use serde_json::{Value, json};

use onebridge_adapter_onebot::{OneBotClient, Segment};

use crate::error::{BroadcastError, BroadcastResult};

/// Runs the helper named by `path`.
pub async fn call(client: &OneBotClient, path: &str, args: &Value) -> BroadcastResult<Value> {
    let value = match path {
        "send.group" => {
            let sent = client
                .send_group_msg(id(args, "group_id")?, message(args)?)
                .await?;
            serde_json::to_value(sent)?
        }
        "send.private" => {
            let sent = client
                .send_private_msg(id(args, "user_id")?, message(args)?)
                .await?;
            serde_json::to_value(sent)?
        }
        "message.get" => {
            client
                .data("get_msg", json!({"message_id": id(args, "message_id")?}))
                .await?
        }
        "message.recall" => {
            client.delete_msg(id(args, "message_id")?).await?;
            Value::Null
        }
        "user.info" => serde_json::to_value(
            client
                .get_stranger_info(id(args, "user_id")?, flag(args, "no_cache"))
                .await?,
        )?,
        "group.info" => serde_json::to_value(
            client
                .get_group_info(id(args, "group_id")?, flag(args, "no_cache"))
                .await?,
        )?,
        "group.member" => serde_json::to_value(
            client
                .get_group_member_info(
                    id(args, "group_id")?,
                    id(args, "user_id")?,
                    flag(args, "no_cache"),
                )
                .await?,
        )?,
        "login.info" => serde_json::to_value(client.get_login_info().await?)?,
        other => return Err(BroadcastError::UnknownPath(other.to_string())),
    };
    Ok(value)
}

fn id(args: &Value, name: &str) -> BroadcastResult<i64> {
    match args.get(name) {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| BroadcastError::InvalidArgs(format!("'{name}' must be an integer ID")))
}

fn flag(args: &Value, name: &str) -> bool {
    args.get(name).and_then(Value::as_bool).unwrap_or(false)
}

fn message(args: &Value) -> BroadcastResult<Vec<Segment>> {
    match args.get("message") {
        Some(Value::String(text)) => Ok(vec![Segment::text(text.clone())]),
        Some(segments @ Value::Array(_)) => Ok(serde_json::from_value(segments.clone())?),
        _ => Err(BroadcastError::InvalidArgs(
            "'message' must be a string or a segment array".into(),
        )),
    }
}
