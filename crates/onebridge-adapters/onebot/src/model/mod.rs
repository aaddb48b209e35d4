//! OneBot v11 wire model.

pub mod api;
pub mod event;
pub mod frame;
pub mod segment;

pub use api::{
    FriendInfo, GroupInfo, GroupMemberInfo, LoginInfo, MessageInfo, SentMessage, StrangerInfo,
};
pub use event::{
    EventKind, GatewayEvent, MessageEvent, MessageType, MetaEvent, NoticeEvent, RequestEvent,
    Sender,
};
pub use frame::{ApiRequest, ApiResponse, InboundFrame, response_data};
pub use segment::{
    AtData, FaceData, ForwardData, MediaData, NodeData, ReplyData, Segment, TextData, plain_text,
};
