//! 客户端二进制编解码
//!
//! 二进制帧是定长数值数组，末尾元素是消息类型标记，
//! 启用中继的房间里倒数第二个元素是发送者的房间内句柄。

pub mod typed;

pub use typed::{ByteKind, CodecError, TypedArray, decode_typed, encode_typed};
