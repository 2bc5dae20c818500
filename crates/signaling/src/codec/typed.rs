use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("unknown byte kind: {0}")]
    UnknownKind(u8),

    #[error("{len} bytes is not a multiple of the {kind} element size {size}")]
    Misaligned {
        kind: ByteKind,
        len: usize,
        size: usize,
    },
}

/// 数组元素类型，数值与客户端约定一致（0 保留为"无"）
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum ByteKind {
    Int8 = 1,
    Uint8 = 2,
    Int16 = 3,
    Uint16 = 4,
    Int32 = 5,
    Uint32 = 6,
    Float32 = 7,
    Float64 = 8,
}

impl ByteKind {
    /// 单个元素占用的字节数
    pub fn element_size(self) -> usize {
        match self {
            ByteKind::Int8 | ByteKind::Uint8 => 1,
            ByteKind::Int16 | ByteKind::Uint16 => 2,
            ByteKind::Int32 | ByteKind::Uint32 | ByteKind::Float32 => 4,
            ByteKind::Float64 => 8,
        }
    }

    fn put(self, buf: &mut BytesMut, value: f64) {
        match self {
            ByteKind::Int8 => buf.put_i8(value as i8),
            ByteKind::Uint8 => buf.put_u8(value as u8),
            ByteKind::Int16 => buf.put_i16_le(value as i16),
            ByteKind::Uint16 => buf.put_u16_le(value as u16),
            ByteKind::Int32 => buf.put_i32_le(value as i32),
            ByteKind::Uint32 => buf.put_u32_le(value as u32),
            ByteKind::Float32 => buf.put_f32_le(value as f32),
            ByteKind::Float64 => buf.put_f64_le(value),
        }
    }

    fn read(self, chunk: &[u8]) -> f64 {
        match self {
            ByteKind::Int8 => chunk[0] as i8 as f64,
            ByteKind::Uint8 => chunk[0] as f64,
            ByteKind::Int16 => i16::from_le_bytes([chunk[0], chunk[1]]) as f64,
            ByteKind::Uint16 => u16::from_le_bytes([chunk[0], chunk[1]]) as f64,
            ByteKind::Int32 => {
                i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as f64
            }
            ByteKind::Uint32 => {
                u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as f64
            }
            ByteKind::Float32 => {
                f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as f64
            }
            ByteKind::Float64 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(chunk);
                f64::from_le_bytes(raw)
            }
        }
    }
}

impl From<ByteKind> for u8 {
    fn from(kind: ByteKind) -> Self {
        kind as u8
    }
}

impl TryFrom<u8> for ByteKind {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => ByteKind::Int8,
            2 => ByteKind::Uint8,
            3 => ByteKind::Int16,
            4 => ByteKind::Uint16,
            5 => ByteKind::Int32,
            6 => ByteKind::Uint32,
            7 => ByteKind::Float32,
            8 => ByteKind::Float64,
            other => return Err(CodecError::UnknownKind(other)),
        })
    }
}

/// 已按元素类型解释的数值数组
///
/// 所有 8 种元素类型都能无损表示为 f64，因此内部统一以 f64 存储，
/// 只在编码时按类型截断。
#[derive(Debug, Clone, PartialEq)]
pub struct TypedArray {
    kind: ByteKind,
    values: Vec<f64>,
}

impl TypedArray {
    pub fn new(kind: ByteKind, values: Vec<f64>) -> Self {
        Self { kind, values }
    }

    pub fn kind(&self) -> ByteKind {
        self.kind
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn set(&mut self, index: usize, value: f64) -> bool {
        match self.values.get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// 末尾的消息类型标记
    pub fn tag(&self) -> Option<f64> {
        self.values.last().copied()
    }

    /// 倒数第二个元素：发送者句柄
    pub fn handle(&self) -> Option<f64> {
        self.values.len().checked_sub(2).map(|i| self.values[i])
    }

    /// 用服务端已知的句柄与标记替换末尾两个槽位
    ///
    /// 数组不足两个元素时直接追加。
    pub fn retag(&mut self, handle: u8, tag: u8) {
        let keep = self.values.len().saturating_sub(2);
        self.values.truncate(keep);
        self.values.push(handle as f64);
        self.values.push(tag as f64);
    }

    /// 按元素类型序列化为小端字节
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.values.len() * self.kind.element_size());
        for value in &self.values {
            self.kind.put(&mut buf, *value);
        }
        buf.freeze()
    }

    /// 按元素类型解释原始字节，长度必须是元素大小的整数倍
    pub fn from_bytes(kind: ByteKind, raw: &[u8]) -> Result<Self, CodecError> {
        let size = kind.element_size();
        if raw.len() % size != 0 {
            return Err(CodecError::Misaligned {
                kind,
                len: raw.len(),
                size,
            });
        }
        let values = raw.chunks_exact(size).map(|chunk| kind.read(chunk)).collect();
        Ok(Self { kind, values })
    }
}

/// 分配一个 `length` 个数据元素的数组，并在末尾预留句柄（可选）和类型标记槽位
pub fn encode_typed(kind: ByteKind, length: usize, handle: Option<u8>, tag: u8) -> TypedArray {
    let trailer = 1 + usize::from(handle.is_some());
    let mut values = vec![0.0; length + trailer];
    let last = values.len() - 1;
    values[last] = tag as f64;
    if let Some(handle) = handle {
        values[last - 1] = handle as f64;
    }
    TypedArray::new(kind, values)
}

/// 将原始字节解释为 `kind` 对应的数值数组
pub fn decode_typed(kind: u8, raw: &[u8]) -> Result<TypedArray, CodecError> {
    TypedArray::from_bytes(ByteKind::try_from(kind)?, raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_reserves_trailer() {
        let arr = encode_typed(ByteKind::Int16, 4, Some(9), 2);
        assert_eq!(arr.len(), 6);
        assert_eq!(arr.tag(), Some(2.0));
        assert_eq!(arr.handle(), Some(9.0));

        let arr = encode_typed(ByteKind::Int16, 4, None, 1);
        assert_eq!(arr.len(), 5);
        assert_eq!(arr.tag(), Some(1.0));
        assert_eq!(arr.handle(), Some(0.0));
    }

    #[test]
    fn test_decode_recovers_values() {
        let mut arr = encode_typed(ByteKind::Float32, 3, Some(17), 2);
        arr.set(0, 1.5);
        arr.set(1, -2.25);
        arr.set(2, 1024.0);

        let bytes = arr.to_bytes();
        assert_eq!(bytes.len(), 5 * 4);

        let decoded = decode_typed(ByteKind::Float32 as u8, &bytes).unwrap();
        assert_eq!(decoded, arr);
        assert_eq!(decoded.values(), &[1.5, -2.25, 1024.0, 17.0, 2.0]);
    }

    #[test]
    fn test_signed_and_wide_kinds() {
        let arr = TypedArray::new(ByteKind::Int8, vec![-128.0, -1.0, 127.0]);
        let decoded = decode_typed(1, &arr.to_bytes()).unwrap();
        assert_eq!(decoded.values(), &[-128.0, -1.0, 127.0]);

        let arr = TypedArray::new(ByteKind::Uint32, vec![4_000_000_000.0, 2.0]);
        let decoded = decode_typed(6, &arr.to_bytes()).unwrap();
        assert_eq!(decoded.values(), &[4_000_000_000.0, 2.0]);

        let arr = TypedArray::new(ByteKind::Float64, vec![std::f64::consts::PI]);
        let decoded = decode_typed(8, &arr.to_bytes()).unwrap();
        assert_eq!(decoded.values(), &[std::f64::consts::PI]);
    }

    #[test]
    fn test_decode_rejects_unknown_kind() {
        assert_eq!(decode_typed(0, &[1, 2]), Err(CodecError::UnknownKind(0)));
        assert_eq!(decode_typed(9, &[1, 2]), Err(CodecError::UnknownKind(9)));
    }

    #[test]
    fn test_decode_rejects_misaligned_length() {
        let err = decode_typed(ByteKind::Int32 as u8, &[0, 0, 0, 0, 1]).unwrap_err();
        assert!(matches!(
            err,
            CodecError::Misaligned { len: 5, size: 4, .. }
        ));
    }

    #[test]
    fn test_retag_replaces_trailer() {
        let mut arr = TypedArray::new(ByteKind::Uint8, vec![10.0, 20.0, 99.0, 2.0]);
        arr.retag(3, 2);
        assert_eq!(arr.values(), &[10.0, 20.0, 3.0, 2.0]);

        let mut short = TypedArray::new(ByteKind::Uint8, vec![2.0]);
        short.retag(5, 2);
        assert_eq!(short.values(), &[5.0, 2.0]);
    }

    #[test]
    fn test_byte_kind_names() {
        assert_eq!("float32".parse::<ByteKind>().unwrap(), ByteKind::Float32);
        assert_eq!(ByteKind::Uint16.to_string(), "uint16");
        assert_eq!(serde_json::to_string(&ByteKind::Int32).unwrap(), "5");
        assert_eq!(
            serde_json::from_str::<ByteKind>("7").unwrap(),
            ByteKind::Float32
        );
        assert!(serde_json::from_str::<ByteKind>("0").is_err());
    }
}
