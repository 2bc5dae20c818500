//! Connecta 基础设施库
//!
//! 为 Connecta 信令与中继服务提供配置、错误、TLS、监控指标等公共组件

pub mod config;
pub mod error;
pub mod metrics;
pub mod monitoring;
pub mod util;

pub use error::{BaseError, ConfigError, NetworkError, Result, SerializationError};
pub use monitoring::{ServiceCollector, ServiceInfo, ServiceState, ServiceType};
pub use util::TlsConfigurer;
