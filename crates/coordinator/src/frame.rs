//! 控制通道分帧
//!
//! 每条控制消息编码为 `Ʃ` + JSON + `Ƶ`。解码时以结束标记切分，
//! 取最后一个起始标记之后的内容，标记之外的杂散字节被丢弃。
//! 结束标记尚未到达时保留缓冲，等待更多数据。

use bytes::{BufMut, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use crate::protocol::ControlMessage;

pub const START_MARKER: char = 'Ʃ';
pub const END_MARKER: char = 'Ƶ';

const START_BYTES: &[u8] = "Ʃ".as_bytes();
const END_BYTES: &[u8] = "Ƶ".as_bytes();

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("frame has no start marker")]
    MissingStart,

    #[error("unknown control event {0}")]
    UnknownEvent(i64),

    #[error("invalid payload: {0}")]
    Payload(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// 控制通道编解码器
///
/// 解码出的单帧错误以 `Item = Err(..)` 返回，不会中断整条连接。
#[derive(Debug, Default)]
pub struct ControlCodec {
    // 已扫描过、确认不含结束标记的前缀长度
    scanned: usize,
}

impl ControlCodec {
    pub fn new() -> Self {
        Self::default()
    }

    fn parse(body: &[u8]) -> Result<ControlMessage, FrameError> {
        let text = std::str::from_utf8(body)?;
        let start = text.rfind(START_MARKER).ok_or(FrameError::MissingStart)?;
        ControlMessage::from_json(&text[start + START_MARKER.len_utf8()..])
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

impl Decoder for ControlCodec {
    type Item = Result<ControlMessage, FrameError>;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let from = self.scanned.min(src.len());
        let Some(pos) = find(&src[from..], END_BYTES) else {
            // 结束标记可能跨越两次读取
            self.scanned = src.len().saturating_sub(END_BYTES.len() - 1);
            return Ok(None);
        };

        let frame = src.split_to(from + pos + END_BYTES.len());
        self.scanned = 0;
        let body = &frame[..frame.len() - END_BYTES.len()];
        Ok(Some(Self::parse(body)))
    }
}

impl Encoder<ControlMessage> for ControlCodec {
    type Error = FrameError;

    fn encode(&mut self, item: ControlMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        // 标记字符只可能出现在 JSON 字符串内，改写为 \u 转义后帧内不再含标记
        let json = item
            .to_json()?
            .replace(START_MARKER, "\\u01a9")
            .replace(END_MARKER, "\\u01b5");
        dst.reserve(START_BYTES.len() + json.len() + END_BYTES.len());
        dst.put_slice(START_BYTES);
        dst.put_slice(json.as_bytes());
        dst.put_slice(END_BYTES);
        Ok(())
    }
}
