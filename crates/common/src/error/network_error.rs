//! 网络相关错误类型

use thiserror::Error;

/// 网络相关错误
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("TLS error: {message}")]
    Tls { message: String },
}
