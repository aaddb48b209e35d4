//! Typed `data` payloads of common actions.
//!
//! Fields are lenient: gateways differ in which optional fields they fill,
//! so everything except the identifying IDs defaults.

use serde::{Deserialize, Serialize};

use super::event::Sender;
use super::segment::{Segment, segments_or_string};

/// `send_*_msg` result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentMessage {
    /// ID of the sent message.
    pub message_id: i64,
}

/// `get_login_info` result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoginInfo {
    /// Bot account.
    pub user_id: i64,
    /// Bot nickname.
    #[serde(default)]
    pub nickname: String,
}

/// `get_stranger_info` result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrangerInfo {
    /// User ID.
    pub user_id: i64,
    /// Nickname.
    #[serde(default)]
    pub nickname: String,
    /// Sex (`male`, `female`, `unknown`).
    #[serde(default)]
    pub sex: String,
    /// Age.
    #[serde(default)]
    pub age: i32,
}

/// `get_friend_list` entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FriendInfo {
    /// User ID.
    pub user_id: i64,
    /// Nickname.
    #[serde(default)]
    pub nickname: String,
    /// Friend remark.
    #[serde(default)]
    pub remark: String,
}

/// `get_group_info` / `get_group_list` entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupInfo {
    /// Group ID.
    pub group_id: i64,
    /// Group name.
    #[serde(default)]
    pub group_name: String,
    /// Current member count.
    #[serde(default)]
    pub member_count: i32,
    /// Member capacity.
    #[serde(default)]
    pub max_member_count: i32,
}

/// `get_group_member_info` result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupMemberInfo {
    /// Group ID.
    pub group_id: i64,
    /// User ID.
    pub user_id: i64,
    /// Nickname.
    #[serde(default)]
    pub nickname: String,
    /// Group card.
    #[serde(default)]
    pub card: String,
    /// Role (`owner`, `admin`, `member`).
    #[serde(default)]
    pub role: String,
    /// Special title.
    #[serde(default)]
    pub title: String,
}

impl GroupMemberInfo {
    /// Card if set, nickname otherwise.
    pub fn display_name(&self) -> &str {
        if self.card.is_empty() {
            &self.nickname
        } else {
            &self.card
        }
    }
}

/// `get_msg` result.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageInfo {
    /// Message ID.
    pub message_id: i64,
    /// Unix timestamp in seconds.
    #[serde(default)]
    pub time: i64,
    /// `private` or `group`.
    #[serde(default)]
    pub message_type: Option<String>,
    /// Sender details.
    #[serde(default)]
    pub sender: Sender,
    /// Ordered segments.
    #[serde(default, deserialize_with = "segments_or_string")]
    pub message: Vec<Segment>,
    /// Raw message string.
    #[serde(default)]
    pub raw_message: String,
}
