//! 客户端线上消息格式
//!
//! 文本帧：`<类型数字><JSON>`，JSON 形如 `{ev, data, id?, rtcId?}`。
//! 服务端下发的消息是不带类型数字的纯 JSON。
//! 二进制帧没有前缀，类型由解码后数组的末尾元素决定。

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::{ByteKind, TypedArray};

/// 文本帧首字符 / 二进制帧末尾元素表示的消息类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Signaling = 1,
    FallbackRelay = 2,
    AppMessage = 3,
    Keepalive = 4,
}

impl MessageType {
    pub fn from_digit(digit: u8) -> Option<Self> {
        match digit {
            b'1' => Some(MessageType::Signaling),
            b'2' => Some(MessageType::FallbackRelay),
            b'3' => Some(MessageType::AppMessage),
            b'4' => Some(MessageType::Keepalive),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

/// 协议内部事件码（负数）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum InternalEvent {
    Redirect = -1,
    Connected = -2,
    Sdp = -3,
    Ice = -4,
    RelayConnect = -5,
    RelayDisconnect = -6,
    FallbackListSize = -7,
    FallbackRelay = -8,
    JoinedRoom = -9,
    UserJoined = -10,
    LeftRoom = -11,
    UserLeft = -12,
    RoomParams = -13,
    Keepalive = -14,
}

impl InternalEvent {
    pub fn from_code(code: i64) -> Option<Self> {
        use InternalEvent::*;
        Some(match code {
            -1 => Redirect,
            -2 => Connected,
            -3 => Sdp,
            -4 => Ice,
            -5 => RelayConnect,
            -6 => RelayDisconnect,
            -7 => FallbackListSize,
            -8 => FallbackRelay,
            -9 => JoinedRoom,
            -10 => UserJoined,
            -11 => LeftRoom,
            -12 => UserLeft,
            -13 => RoomParams,
            -14 => Keepalive,
            _ => return None,
        })
    }

    pub fn code(self) -> i64 {
        self as i64
    }
}

/// 事件名：负整数为内部事件，其余整数或字符串由应用定义
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventName {
    Code(i64),
    Name(String),
}

impl EventName {
    pub fn internal(&self) -> Option<InternalEvent> {
        match self {
            EventName::Code(code) => InternalEvent::from_code(*code),
            EventName::Name(_) => None,
        }
    }
}

impl From<InternalEvent> for EventName {
    fn from(ev: InternalEvent) -> Self {
        EventName::Code(ev.code())
    }
}

impl From<&str> for EventName {
    fn from(name: &str) -> Self {
        match name.parse::<i64>() {
            Ok(code) => EventName::Code(code),
            Err(_) => EventName::Name(name.to_string()),
        }
    }
}

impl std::fmt::Display for EventName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventName::Code(code) => write!(f, "{code}"),
            EventName::Name(name) => f.write_str(name),
        }
    }
}

/// JSON 消息体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub ev: EventName,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, rename = "rtcId", skip_serializing_if = "Option::is_none")]
    pub rtc_id: Option<u8>,
}

impl Envelope {
    pub fn new(ev: impl Into<EventName>, data: Value) -> Self {
        Self {
            ev: ev.into(),
            data,
            id: None,
            rtc_id: None,
        }
    }
}

/// 一帧出站或入站数据
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
}

/// 中继负载：文本原样转发，二进制需要重写末尾槽位
#[derive(Debug, Clone, PartialEq)]
pub enum RelayPayload {
    Text(String),
    Binary(TypedArray),
}

/// 入站消息的分类结果
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Signaling(Envelope),
    FallbackRelay(RelayPayload),
    AppMessage(Envelope),
    Keepalive,
    ByteArray(TypedArray),
    Raw(Frame),
}

/// 线上格式编解码，封装 base64 选项
#[derive(Debug, Clone, Copy, Default)]
pub struct WireFormat {
    pub encode_base64: bool,
}

impl WireFormat {
    pub fn new(encode_base64: bool) -> Self {
        Self { encode_base64 }
    }

    /// 按首字符分类文本帧
    pub fn decode_text(&self, text: &str) -> Inbound {
        let raw = || Inbound::Raw(Frame::Text(text.to_string()));
        let Some(kind) = text
            .as_bytes()
            .first()
            .and_then(|b| MessageType::from_digit(*b))
        else {
            return raw();
        };
        let body = &text[1..];

        match kind {
            MessageType::Signaling => self.parse_envelope(body).map_or_else(raw, Inbound::Signaling),
            MessageType::AppMessage => {
                self.parse_envelope(body).map_or_else(raw, Inbound::AppMessage)
            }
            MessageType::FallbackRelay => {
                Inbound::FallbackRelay(RelayPayload::Text(body.to_string()))
            }
            MessageType::Keepalive => Inbound::Keepalive,
        }
    }

    /// 按房间元素类型解释二进制帧，再根据末尾标记分类
    pub fn decode_binary(&self, data: &Bytes, kind: ByteKind) -> Inbound {
        match TypedArray::from_bytes(kind, data) {
            Ok(arr) if arr.tag() == Some(MessageType::FallbackRelay.code() as f64) => {
                Inbound::FallbackRelay(RelayPayload::Binary(arr))
            }
            Ok(arr) => Inbound::ByteArray(arr),
            Err(_) => Inbound::Raw(Frame::Binary(data.clone())),
        }
    }

    fn parse_envelope(&self, body: &str) -> Option<Envelope> {
        if self.encode_base64 {
            let decoded = BASE64.decode(body.trim()).ok()?;
            serde_json::from_slice(&decoded).ok()
        } else {
            serde_json::from_str(body).ok()
        }
    }

    /// 序列化下发给客户端的消息
    pub fn encode(&self, envelope: &Envelope) -> Frame {
        let json = serde_json::to_string(envelope).unwrap_or_else(|_| "{}".to_string());
        if self.encode_base64 {
            Frame::Text(BASE64.encode(json))
        } else {
            Frame::Text(json)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_text_frames() {
        let wire = WireFormat::default();

        match wire.decode_text(r#"1{"ev":-4,"id":"peer","data":{"candidate":"x"}}"#) {
            Inbound::Signaling(env) => {
                assert_eq!(env.ev.internal(), Some(InternalEvent::Ice));
                assert_eq!(env.id.as_deref(), Some("peer"));
            }
            other => panic!("unexpected {other:?}"),
        }

        assert_eq!(
            wire.decode_text("2{\"anything\":1}"),
            Inbound::FallbackRelay(RelayPayload::Text("{\"anything\":1}".to_string()))
        );

        match wire.decode_text(r#"3{"ev":"chat","data":"hi"}"#) {
            Inbound::AppMessage(env) => {
                assert_eq!(env.ev, EventName::Name("chat".to_string()));
                assert_eq!(env.data, json!("hi"));
            }
            other => panic!("unexpected {other:?}"),
        }

        assert_eq!(wire.decode_text("4"), Inbound::Keepalive);
    }

    #[test]
    fn test_unparseable_text_is_raw() {
        let wire = WireFormat::default();
        for text in ["", "hello", "1{not json", "3", "9{}"] {
            assert_eq!(
                wire.decode_text(text),
                Inbound::Raw(Frame::Text(text.to_string())),
                "{text}"
            );
        }
    }

    #[test]
    fn test_binary_classification_uses_trailing_tag() {
        let wire = WireFormat::default();

        let relay = TypedArray::new(ByteKind::Uint8, vec![7.0, 1.0, 2.0]);
        assert_eq!(
            wire.decode_binary(&relay.to_bytes(), ByteKind::Uint8),
            Inbound::FallbackRelay(RelayPayload::Binary(relay))
        );

        let data = TypedArray::new(ByteKind::Uint8, vec![7.0, 1.0, 3.0]);
        assert_eq!(
            wire.decode_binary(&data.to_bytes(), ByteKind::Uint8),
            Inbound::ByteArray(data)
        );

        let odd = Bytes::from_static(&[1, 2, 3]);
        assert_eq!(
            wire.decode_binary(&odd, ByteKind::Int16),
            Inbound::Raw(Frame::Binary(odd))
        );
    }

    #[test]
    fn test_base64_wire() {
        let wire = WireFormat::new(true);
        let env = Envelope::new(InternalEvent::Connected, json!("abc"));

        let Frame::Text(encoded) = wire.encode(&env) else {
            panic!("expected text frame");
        };
        let json = BASE64.decode(&encoded).unwrap();
        assert_eq!(serde_json::from_slice::<Envelope>(&json).unwrap(), env);

        let inbound = format!("3{}", BASE64.encode(r#"{"ev":5,"data":[1,2]}"#));
        match wire.decode_text(&inbound) {
            Inbound::AppMessage(env) => assert_eq!(env.ev, EventName::Code(5)),
            other => panic!("unexpected {other:?}"),
        }

        assert!(matches!(wire.decode_text("3{\"ev\":5}"), Inbound::Raw(_)));
    }

    #[test]
    fn test_envelope_serialization_skips_empty_fields() {
        let env = Envelope::new(InternalEvent::Keepalive, Value::Null);
        assert_eq!(serde_json::to_string(&env).unwrap(), r#"{"ev":-14}"#);

        let mut env = Envelope::new(InternalEvent::Sdp, json!({"sdp": "v=0"}));
        env.id = Some("a".to_string());
        env.rtc_id = Some(3);
        assert_eq!(
            serde_json::to_string(&env).unwrap(),
            r#"{"ev":-3,"data":{"sdp":"v=0"},"id":"a","rtcId":3}"#
        );
    }
}
