//! 控制消息
//!
//! 线上格式为 `{"ev": <code>, "data": <payload>}`，`ev` 取值见 [`ControlEvent`]。

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use signaling::{ClientBinding, Frame};

use crate::frame::FrameError;

/// 控制事件编号
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum ControlEvent {
    /// worker → master：握手，携带 pid、对外地址与存活客户端
    WorkerConnected = 1,
    /// worker → master：新客户端接入
    ClientConnected = 2,
    /// worker → master：客户端断开
    ClientDisconnected = 3,
    /// worker → master：客户端原始入站消息
    EventMessage = 4,
    /// 双向：投递给指定客户端的帧
    MessageTransfer = 5,
    /// worker → master 上报中继状态；master → worker 推送客户端绑定
    RelayFailUpdate = 6,
}

impl ControlEvent {
    pub fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            1 => Self::WorkerConnected,
            2 => Self::ClientConnected,
            3 => Self::ClientDisconnected,
            4 => Self::EventMessage,
            5 => Self::MessageTransfer,
            6 => Self::RelayFailUpdate,
            _ => return None,
        })
    }

    pub fn code(self) -> i64 {
        self as i64
    }
}

/// worker 握手
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerHello {
    pub pid: u32,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub clients: Vec<String>,
}

/// 一个客户端的一帧数据，二进制帧以 base64 承载
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientPayload {
    pub id: String,
    pub data: String,
    #[serde(default)]
    pub binary: bool,
}

impl ClientPayload {
    pub fn from_frame(id: impl Into<String>, frame: Frame) -> Self {
        let (data, binary) = match frame {
            Frame::Text(text) => (text, false),
            Frame::Binary(bytes) => (BASE64.encode(&bytes), true),
        };
        Self {
            id: id.into(),
            data,
            binary,
        }
    }

    pub fn into_frame(self) -> Result<Frame, FrameError> {
        if self.binary {
            BASE64
                .decode(self.data.as_bytes())
                .map(|raw| Frame::Binary(Bytes::from(raw)))
                .map_err(|e| FrameError::Payload(e.to_string()))
        } else {
            Ok(Frame::Text(self.data))
        }
    }
}

/// worker 上报的中继状态变化，`add = true` 表示两端不可直连
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayReport {
    pub add: bool,
    pub id1: String,
    pub id2: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RelayFailUpdate {
    Report(RelayReport),
    Binding(ClientBinding),
}

/// 控制通道消息
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    WorkerConnected(WorkerHello),
    ClientConnected(String),
    ClientDisconnected(String),
    EventMessage(ClientPayload),
    MessageTransfer(ClientPayload),
    RelayFailUpdate(RelayFailUpdate),
}

#[derive(Deserialize)]
struct RawControl {
    ev: i64,
    #[serde(default)]
    data: Value,
}

impl ControlMessage {
    pub fn event(&self) -> ControlEvent {
        match self {
            Self::WorkerConnected(_) => ControlEvent::WorkerConnected,
            Self::ClientConnected(_) => ControlEvent::ClientConnected,
            Self::ClientDisconnected(_) => ControlEvent::ClientDisconnected,
            Self::EventMessage(_) => ControlEvent::EventMessage,
            Self::MessageTransfer(_) => ControlEvent::MessageTransfer,
            Self::RelayFailUpdate(_) => ControlEvent::RelayFailUpdate,
        }
    }

    pub fn to_json(&self) -> Result<String, FrameError> {
        let data = match self {
            Self::WorkerConnected(hello) => serde_json::to_value(hello)?,
            Self::ClientConnected(id) | Self::ClientDisconnected(id) => Value::String(id.clone()),
            Self::EventMessage(payload) | Self::MessageTransfer(payload) => {
                serde_json::to_value(payload)?
            }
            Self::RelayFailUpdate(update) => serde_json::to_value(update)?,
        };
        Ok(json!({ "ev": self.event().code(), "data": data }).to_string())
    }

    pub fn from_json(text: &str) -> Result<Self, FrameError> {
        let raw: RawControl = serde_json::from_str(text)?;
        let event = ControlEvent::from_code(raw.ev).ok_or(FrameError::UnknownEvent(raw.ev))?;
        let data = raw.data;

        Ok(match event {
            ControlEvent::WorkerConnected => Self::WorkerConnected(serde_json::from_value(data)?),
            ControlEvent::ClientConnected => Self::ClientConnected(serde_json::from_value(data)?),
            ControlEvent::ClientDisconnected => {
                Self::ClientDisconnected(serde_json::from_value(data)?)
            }
            ControlEvent::EventMessage => Self::EventMessage(serde_json::from_value(data)?),
            ControlEvent::MessageTransfer => Self::MessageTransfer(serde_json::from_value(data)?),
            ControlEvent::RelayFailUpdate => Self::RelayFailUpdate(serde_json::from_value(data)?),
        })
    }
}
