//! 应用层事件
//!
//! 由 [`Hub`](crate::hub::Hub) 在处理完一次操作后发布到 broadcast 通道，
//! 应用通过 `SignalingServer::subscribe` 订阅。

use serde_json::Value;

use crate::codec::ByteKind;
use crate::wire::{EventName, Frame};

#[derive(Debug, Clone, PartialEq)]
pub enum HubEvent {
    Connected {
        id: String,
    },
    Disconnected {
        id: String,
    },
    RoomCreated {
        name: String,
    },
    RoomDeleted {
        name: String,
    },
    /// 客户端发送的应用消息（类型 3）
    Message {
        id: String,
        ev: EventName,
        data: Value,
    },
    /// 无法识别的帧，原样交给应用
    RawMessage {
        id: String,
        payload: Frame,
    },
    /// 非中继标记的二进制数组
    ByteArray {
        id: String,
        kind: ByteKind,
        values: Vec<f64>,
    },
}

impl HubEvent {
    /// 触发该事件的客户端
    pub fn client_id(&self) -> Option<&str> {
        match self {
            HubEvent::Connected { id }
            | HubEvent::Disconnected { id }
            | HubEvent::Message { id, .. }
            | HubEvent::RawMessage { id, .. }
            | HubEvent::ByteArray { id, .. } => Some(id),
            HubEvent::RoomCreated { .. } | HubEvent::RoomDeleted { .. } => None,
        }
    }
}
