//! 信令协议配置

use serde::{Deserialize, Serialize};

/// 可识别的字节数组元素类型名称
pub const BYTE_KIND_NAMES: [&str; 8] = [
    "int8", "uint8", "int16", "uint16", "int32", "uint32", "float32", "float64",
];

/// 信令协议配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SignalingConfig {
    /// 客户端 WebSocket 路径
    #[serde(default = "default_ws_path")]
    pub ws_path: String,

    /// 字符串负载是否以 base64 编码传输
    #[serde(default)]
    pub encode_base64: bool,

    /// 服务端主动心跳间隔（秒），0 表示不发送
    #[serde(default)]
    pub keepalive_secs: u64,

    /// 根房间名称，所有新连接自动加入
    #[serde(default = "default_root_room")]
    pub root_room: String,

    /// 根房间是否静默（不发送加入/离开通知）
    #[serde(default = "default_true")]
    pub root_room_silent: bool,

    /// 管理接口根密钥，空字符串表示禁用管理接口
    #[serde(default)]
    pub admin_root_key: String,

    /// 新建房间默认的字节数组元素类型
    #[serde(default = "default_byte_kind")]
    pub default_byte_kind: String,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            ws_path: default_ws_path(),
            encode_base64: false,
            keepalive_secs: 0,
            root_room: default_root_room(),
            root_room_silent: true,
            admin_root_key: String::new(),
            default_byte_kind: default_byte_kind(),
        }
    }
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_root_room() -> String {
    "/".to_string()
}

fn default_byte_kind() -> String {
    "uint8".to_string()
}

fn default_true() -> bool {
    true
}

impl SignalingConfig {
    /// 是否启用了管理接口
    pub fn is_admin_enabled(&self) -> bool {
        !self.admin_root_key.trim().is_empty()
    }

    pub(crate) fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if !self.ws_path.starts_with('/') {
            errors.push(format!(
                "signaling.ws_path must start with '/', got '{}'",
                self.ws_path
            ));
        }

        if self.root_room.is_empty() {
            errors.push("signaling.root_room cannot be empty".to_string());
        }

        if !BYTE_KIND_NAMES.contains(&self.default_byte_kind.as_str()) {
            errors.push(format!(
                "Invalid signaling.default_byte_kind '{}', must be one of: {}",
                self.default_byte_kind,
                BYTE_KIND_NAMES.join(", ")
            ));
        }

        if self.admin_root_key.contains('/') {
            errors.push("signaling.admin_root_key cannot contain '/'".to_string());
        } else if self.is_admin_enabled() && self.admin_root_key.len() < 8 {
            errors.push(
                "Warning: signaling.admin_root_key is short, recommend at least 8 characters"
                    .to_string(),
            );
        }

        errors
    }
}
