//! Typed OneBot v11 API client.
//!
//! ```rust,ignore
//! let client = adapter.client();
//! let sent = client.send_group_msg(123456, vec![Segment::text("hi")]).await?;
//! let member = client.get_group_member_info(123456, 10001, false).await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use onebridge_core::ApiResult;

use crate::api_caller::ApiCaller;
use crate::model::{
    FriendInfo, GroupInfo, GroupMemberInfo, LoginInfo, MessageInfo, Segment, SentMessage,
    StrangerInfo, response_data, segment::to_wire,
};
use crate::retry::RetryPolicy;

/// Typed facade over an [`ApiCaller`].
#[derive(Clone)]
pub struct OneBotClient {
    caller: Arc<dyn ApiCaller>,
    retry: RetryPolicy,
}

macro_rules! impl_api {
    // Discards the response payload
    ($(#[$meta:meta])* $name:ident, ($($arg:ident: $typ:ty),*) $(,)?) => {
        $(#[$meta])*
        pub async fn $name(&self, $($arg: $typ),*) -> ApiResult<()> {
            self.data(stringify!($name), json!({ $(stringify!($arg): $arg),* })).await?;
            Ok(())
        }
    };
    // Deserializes `data` into the return type
    ($(#[$meta:meta])* $name:ident, ($($arg:ident: $typ:ty),*) -> $ret:ty $(,)?) => {
        $(#[$meta])*
        pub async fn $name(&self, $($arg: $typ),*) -> ApiResult<$ret> {
            self.typed(stringify!($name), json!({ $(stringify!($arg): $arg),* })).await
        }
    };
}

impl OneBotClient {
    /// Creates a client over `caller` with the default retry policy.
    pub fn new(caller: Arc<dyn ApiCaller>) -> Self {
        Self {
            caller,
            retry: RetryPolicy::default(),
        }
    }

    /// Replaces the retry policy used by [`call_with_retry`](Self::call_with_retry).
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The underlying caller.
    pub fn caller(&self) -> &Arc<dyn ApiCaller> {
        &self.caller
    }

    /// Calls any action and returns the full response object.
    pub async fn call(&self, action: &str, params: Value) -> ApiResult<Value> {
        self.caller.call(action, params).await
    }

    /// Calls any action with a deadline override.
    pub async fn call_with_timeout(
        &self,
        action: &str,
        params: Value,
        timeout: Duration,
    ) -> ApiResult<Value> {
        self.caller
            .call_with_timeout(action, params, Some(timeout))
            .await
    }

    /// Calls any action under the retry policy.
    ///
    /// Only timeouts and connection loss are retried.
    pub async fn call_with_retry(&self, action: &str, params: Value) -> ApiResult<Value> {
        self.retry
            .run(|_| self.caller.call(action, params.clone()))
            .await
    }

    /// Calls an action and returns its `data` payload.
    pub async fn data(&self, action: &str, params: Value) -> ApiResult<Value> {
        Ok(response_data(self.caller.call(action, params).await?))
    }

    async fn typed<T: DeserializeOwned>(&self, action: &str, params: Value) -> ApiResult<T> {
        Ok(serde_json::from_value(self.data(action, params).await?)?)
    }

    /// Sends a private message.
    pub async fn send_private_msg(
        &self,
        user_id: i64,
        message: Vec<Segment>,
    ) -> ApiResult<SentMessage> {
        self.typed(
            "send_private_msg",
            json!({"user_id": user_id, "message": to_wire(&message)}),
        )
        .await
    }

    /// Sends a group message.
    pub async fn send_group_msg(
        &self,
        group_id: i64,
        message: Vec<Segment>,
    ) -> ApiResult<SentMessage> {
        self.typed(
            "send_group_msg",
            json!({"group_id": group_id, "message": to_wire(&message)}),
        )
        .await
    }

    /// Sends a message to a group when `group_id` is set, privately otherwise.
    pub async fn send_msg(
        &self,
        user_id: Option<i64>,
        group_id: Option<i64>,
        message: Vec<Segment>,
    ) -> ApiResult<SentMessage> {
        let mut params = json!({"message": to_wire(&message)});
        if let Some(group_id) = group_id {
            params["message_type"] = json!("group");
            params["group_id"] = json!(group_id);
        } else {
            params["message_type"] = json!("private");
        }
        if let Some(user_id) = user_id {
            params["user_id"] = json!(user_id);
        }
        self.typed("send_msg", params).await
    }

    impl_api!(
        /// Recalls a message.
        delete_msg,
        (message_id: i64)
    );

    impl_api!(
        /// Fetches a message by ID.
        get_msg,
        (message_id: i64) -> MessageInfo
    );

    impl_api!(
        /// Fetches the bot account.
        get_login_info,
        () -> LoginInfo
    );

    impl_api!(
        /// Fetches a user profile.
        get_stranger_info,
        (user_id: i64, no_cache: bool) -> StrangerInfo
    );

    impl_api!(
        /// Fetches group details.
        get_group_info,
        (group_id: i64, no_cache: bool) -> GroupInfo
    );

    impl_api!(
        /// Fetches one member of a group.
        get_group_member_info,
        (group_id: i64, user_id: i64, no_cache: bool) -> GroupMemberInfo
    );

    impl_api!(
        /// Lists joined groups.
        get_group_list,
        () -> Vec<GroupInfo>
    );

    impl_api!(
        /// Lists friends.
        get_friend_list,
        () -> Vec<FriendInfo>
    );
}
