pub mod http;
pub mod https;

pub use crate::config::bind::http::HttpBindConfig;
pub use crate::config::bind::https::HttpsBindConfig;
use serde::{Deserialize, Serialize};

/// 网络绑定配置
///
/// 客户端 WebSocket、管理接口、重定向入口共用同一个公共监听地址。
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BindConfig {
    /// HTTP 服务绑定配置（可选）
    ///
    /// 用于开发环境。生产环境建议使用 HTTPS。
    pub http: Option<HttpBindConfig>,

    /// HTTPS 服务绑定配置（可选）
    pub https: Option<HttpsBindConfig>,
}

impl Default for BindConfig {
    fn default() -> Self {
        Self {
            http: Some(HttpBindConfig::default()),
            https: None,
        }
    }
}
