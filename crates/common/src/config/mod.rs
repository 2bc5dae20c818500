//! 统一配置管理系统
//!
//! 本模块是 Connecta 服务配置的"单一真理之源"。
//! 所有配置项的定义、文档、默认值都在这里统一管理。

pub mod bind;
pub mod coordinator;
pub mod signaling;

pub use crate::config::bind::BindConfig;
pub use crate::config::coordinator::CoordinatorConfig;
pub use crate::config::signaling::SignalingConfig;
use crate::error::{ConfigError, SerializationError};
use serde::{Deserialize, Serialize};

/// Connecta 服务的主配置结构体
///
/// 配置文件使用 TOML 格式，所有段落都有默认值，
/// 因此一个空文件也能得到可运行的开发配置。
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ConnectaConfig {
    /// 服务器实例名称
    ///
    /// 用于在日志和服务信息中区分节点，如：connecta-01。
    #[serde(default = "default_name")]
    pub name: String,

    /// 运行环境标识
    ///
    /// - "dev": 开发环境，允许 HTTP
    /// - "prod": 生产环境，强制 HTTPS
    /// - "test": 测试环境
    #[serde(default = "default_env")]
    pub env: String,

    /// PID 文件路径（可选）
    pub pid: Option<String>,

    /// 网络绑定配置
    #[serde(default)]
    pub bind: BindConfig,

    /// 信令协议配置
    #[serde(default)]
    pub signaling: SignalingConfig,

    /// 多进程分片配置
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// 可观测性配置（日志）
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// 可观测性配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ObservabilityConfig {
    /// 过滤级别
    ///
    /// 支持 EnvFilter 语法（如 "info,tower_http=warn"）。默认值 "info"。
    #[serde(default = "default_filter_level")]
    pub filter_level: String,

    #[serde(default)]
    pub log: LogConfig,
}

/// 日志配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LogConfig {
    /// 日志输出目标："console"（默认）或 "file"
    #[serde(default = "default_log_output")]
    pub output: String,

    /// 当 output = "file" 时按天轮转日志文件
    #[serde(default)]
    pub rotate: bool,

    /// 日志文件目录，当 output = "file" 时有效
    #[serde(default = "default_log_path")]
    pub path: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            filter_level: default_filter_level(),
            log: LogConfig::default(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            output: default_log_output(),
            rotate: false,
            path: default_log_path(),
        }
    }
}

fn default_name() -> String {
    "connecta-default".to_string()
}

fn default_env() -> String {
    "dev".to_string()
}

fn default_log_output() -> String {
    "console".to_string()
}

fn default_log_path() -> String {
    "logs/".to_string()
}

fn default_filter_level() -> String {
    "info".to_string()
}

impl Default for ConnectaConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            env: default_env(),
            pid: Some("logs/connecta.pid".to_string()),
            bind: BindConfig::default(),
            signaling: SignalingConfig::default(),
            coordinator: CoordinatorConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl ConnectaConfig {
    /// 是否为开发环境
    pub fn is_dev(&self) -> bool {
        self.env.eq_ignore_ascii_case("dev")
    }

    /// 是否以 master 身份运行（连接分片到 worker 进程）
    pub fn is_sharded(&self) -> bool {
        self.coordinator.divide_connections
    }

    /// 获取 PID 文件路径，如果没有配置则使用默认值
    pub fn get_pid_path(&self) -> Option<String> {
        self.pid
            .clone()
            .or_else(|| Some("logs/connecta.pid".to_string()))
    }

    /// 返回日志配置引用
    pub fn log_config(&self) -> &LogConfig {
        &self.observability.log
    }

    /// 检查是否使用控制台日志输出
    pub fn is_console_logging(&self) -> bool {
        self.observability.log.output == "console"
    }

    /// 检查是否应该轮转日志
    pub fn should_rotate_logs(&self) -> bool {
        self.observability.log.output == "file" && self.observability.log.rotate
    }

    /// 获取日志过滤级别，优先使用 RUST_LOG
    pub fn get_filter_level(&self) -> String {
        std::env::var("RUST_LOG")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| self.observability.filter_level.clone())
    }

    /// 从文件加载配置
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> crate::Result<Self> {
        let path_ref = path.as_ref();

        if !path_ref.is_file() {
            return Err(ConfigError::FileNotFound {
                path: path_ref.display().to_string(),
            }
            .into());
        }

        let content = std::fs::read_to_string(path_ref)?;
        let config = Self::from_toml(&content).map_err(SerializationError::from)?;

        Ok(config)
    }

    /// 从 TOML 字符串加载配置
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// 将配置序列化为 TOML 字符串
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string(self)
    }

    /// 验证配置有效性
    ///
    /// 以 "Warning:" 开头的条目不会阻止启动。
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.name.trim().is_empty() {
            errors.push("Instance name cannot be empty".to_string());
        }

        if !["dev", "prod", "test"].contains(&self.env.as_str()) {
            errors.push(format!(
                "Invalid environment '{}', must be one of: dev, prod, test",
                self.env
            ));
        }

        {
            let main_level = self
                .observability
                .filter_level
                .split(',')
                .next()
                .unwrap_or("")
                .trim();
            if !["trace", "debug", "info", "warn", "error"].contains(&main_level) {
                errors.push(format!(
                    "Invalid filter level '{}', must start with one of: trace, debug, info, warn, error",
                    self.observability.filter_level
                ));
            }
        }

        if !["console", "file"].contains(&self.observability.log.output.as_str()) {
            errors.push(format!(
                "Invalid log output '{}' (observability.log.output), must be 'console' or 'file'",
                self.observability.log.output
            ));
        }

        if self.bind.http.is_none() && self.bind.https.is_none() {
            errors.push("At least one of bind.http or bind.https must be configured".to_string());
        }

        if let Some(ref https) = self.bind.https {
            errors.extend(https.validate());
        }

        errors.extend(self.signaling.validate());
        errors.extend(self.coordinator.validate());

        if self.env == "prod" {
            if self.bind.https.is_none() {
                errors.push("Production environment should enable HTTPS".to_string());
            }

            if self.observability.log.output == "console" {
                errors.push("Warning: Production environment should use file logging (observability.log.output = \"file\")".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ConnectaConfig::default();
        assert_eq!(config.name, "connecta-default");
        assert_eq!(config.env, "dev");
        assert!(config.is_dev());
        assert!(!config.is_sharded());
        assert_eq!(config.signaling.ws_path, "/ws");
        assert_eq!(config.signaling.root_room, "/");
        assert_eq!(config.coordinator.master_port, 9870);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = ConnectaConfig::from_toml("").unwrap();
        assert_eq!(config.name, "connecta-default");
        assert!(config.bind.http.is_some());
        assert!(config.bind.https.is_none());
        assert!(config.coordinator.spawn_workers);
        assert_eq!(config.coordinator.redirect_delay_ms, 1000);
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = ConnectaConfig::default();
        config.signaling.encode_base64 = true;
        config.coordinator.divide_connections = true;

        let toml_str = config.to_toml().unwrap();
        assert!(toml_str.contains("name = \"connecta-default\""));

        let parsed = ConnectaConfig::from_toml(&toml_str).unwrap();
        assert!(parsed.signaling.encode_base64);
        assert!(parsed.is_sharded());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ConnectaConfig::default();
        config.env = "staging".to_string();
        config.observability.filter_level = "verbose".to_string();
        config.observability.log.output = "syslog".to_string();

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors[0].contains("staging"));
    }

    #[test]
    fn test_prod_requires_https() {
        let mut config = ConnectaConfig::default();
        config.env = "prod".to_string();

        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("HTTPS")));
        assert!(errors.iter().any(|e| e.starts_with("Warning:")));
    }

    #[test]
    fn test_from_file() {
        let missing = ConnectaConfig::from_file("/nonexistent/connecta.toml");
        assert!(matches!(
            missing,
            Err(crate::BaseError::Config(ConfigError::FileNotFound { .. }))
        ));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "name = [").unwrap();
        assert!(matches!(
            ConnectaConfig::from_file(&path),
            Err(crate::BaseError::Serialization(SerializationError::Toml(_)))
        ));

        std::fs::write(&path, "name = \"from-file\"").unwrap();
        assert_eq!(ConnectaConfig::from_file(&path).unwrap().name, "from-file");
    }

    #[test]
    fn test_full_toml() {
        let toml = r#"
            name = "edge-01"
            env = "test"

            [bind.http]
            ip = "0.0.0.0"
            port = 9000
            domain_name = "example.org"

            [signaling]
            encode_base64 = true
            keepalive_secs = 15
            admin_root_key = "secret"
            default_byte_kind = "float32"

            [coordinator]
            divide_connections = true
            workers = 2
            client_host = "10.0.0.5"
        "#;

        let config = ConnectaConfig::from_toml(toml).unwrap();
        assert_eq!(config.name, "edge-01");
        assert_eq!(config.bind.http.as_ref().unwrap().port, 9000);
        assert_eq!(config.signaling.keepalive_secs, 15);
        assert_eq!(config.signaling.admin_root_key, "secret");
        assert_eq!(config.coordinator.workers, 2);
        assert_eq!(config.coordinator.client_host, "10.0.0.5");
        assert!(config.validate().is_ok());
    }
}
