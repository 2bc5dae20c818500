use serde::{Deserialize, Serialize};
use std::path::Path;

/// HTTPS 服务绑定配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HttpsBindConfig {
    /// 域名
    ///
    /// 必须与 SSL 证书中的域名匹配。
    pub domain_name: String,

    /// 绑定 IP 地址
    pub ip: String,

    /// 绑定端口
    pub port: u16,

    /// PEM 格式的 SSL 证书文件路径
    pub cert: String,

    /// PEM 格式的私钥文件路径
    pub key: String,

    /// 私钥口令文件路径（可选）
    ///
    /// rustls 只能加载未加密的私钥，配置此项时会产生警告。
    #[serde(default)]
    pub passphrase: Option<String>,
}

impl Default for HttpsBindConfig {
    fn default() -> Self {
        Self {
            domain_name: "localhost".to_string(),
            ip: "0.0.0.0".to_string(),
            port: 8443,
            cert: "certificates/server.crt".to_string(),
            key: "certificates/server.key".to_string(),
            passphrase: None,
        }
    }
}

impl HttpsBindConfig {
    pub(crate) fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.cert.trim().is_empty() {
            errors.push("bind.https.cert cannot be empty".to_string());
        }
        if self.key.trim().is_empty() {
            errors.push("bind.https.key cannot be empty".to_string());
        }

        if let Some(ref passphrase) = self.passphrase {
            if !Path::new(passphrase).is_file() {
                errors.push(format!(
                    "bind.https.passphrase file does not exist: {passphrase}"
                ));
            }
            errors.push(
                "Warning: bind.https.passphrase is set but encrypted private keys are not supported; provide a decrypted key".to_string(),
            );
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passphrase_is_warning_when_file_exists() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let config = HttpsBindConfig {
            passphrase: Some(file.path().display().to_string()),
            ..Default::default()
        };

        let errors = config.validate();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("Warning:"));
    }

    #[test]
    fn test_missing_passphrase_file() {
        let config = HttpsBindConfig {
            passphrase: Some("/nonexistent/connecta.pass".to_string()),
            ..Default::default()
        };

        let errors = config.validate();
        assert!(errors.iter().any(|e| e.contains("does not exist")));
    }
}
