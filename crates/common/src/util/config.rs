//! TLS 配置实现
//!
//! 提供 TLS 服务器配置和加密提供者管理功能

use crate::error::{BaseError, NetworkError, Result};
use rustls::ServerConfig;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use std::fs;
use std::io::BufReader;
use std::sync::Arc;

fn tls_error(message: impl std::fmt::Display) -> BaseError {
    NetworkError::Tls {
        message: message.to_string(),
    }
    .into()
}

/// TLS configuration utilities
pub struct TlsConfigurer;

impl TlsConfigurer {
    /// 从 PEM 文件创建 rustls 服务端配置
    pub fn create_tls_config(cert_path: &str, key_path: &str) -> Result<ServerConfig> {
        let mut cert_reader = BufReader::new(fs::File::open(cert_path)?);
        let mut key_reader = BufReader::new(fs::File::open(key_path)?);

        let cert_chain: Vec<CertificateDer> = rustls_pemfile::certs(&mut cert_reader)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        if cert_chain.is_empty() {
            return Err(tls_error(format!("No certificate found in {cert_path}")));
        }

        let private_key: PrivateKeyDer = rustls_pemfile::private_key(&mut key_reader)?
            .ok_or_else(|| tls_error(format!("No private key found in {key_path}")))?;

        ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(cert_chain, private_key)
            .map_err(tls_error)
    }

    /// 创建 axum-server 可用的 rustls 配置
    pub fn create_shared_config(cert_path: &str, key_path: &str) -> Result<Arc<ServerConfig>> {
        Self::install_crypto_provider();
        let mut config = Self::create_tls_config(cert_path, key_path)?;
        config.alpn_protocols = vec![b"http/1.1".to_vec()];
        Ok(Arc::new(config))
    }

    /// 安装加密提供程序
    pub fn install_crypto_provider() {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_files() {
        let result = TlsConfigurer::create_tls_config("/nonexistent/cert.pem", "/nonexistent/key.pem");
        assert!(matches!(result, Err(BaseError::Io(_))));
    }

    #[test]
    fn test_empty_certificate() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("cert.pem");
        let key = dir.path().join("key.pem");
        std::fs::write(&cert, "").unwrap();
        std::fs::write(&key, "").unwrap();

        let result = TlsConfigurer::create_tls_config(
            cert.to_str().unwrap(),
            key.to_str().unwrap(),
        );
        assert!(matches!(
            result,
            Err(BaseError::Network(NetworkError::Tls { .. }))
        ));
    }
}
