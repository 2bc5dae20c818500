//! 服务管理模块
//!
//! 提供通用的服务管理抽象，按运行模式组合不同的服务：
//!
//! | 模式 | HTTP 路由服务 | 控制服务 |
//! |------|---------------|----------|
//! | 单进程 | [`SignalingService`] | - |
//! | master | [`RedirectService`] | [`MasterService`] |
//! | worker | [`WorkerService`] | [`WorkerLinkService`] |
//!
//! ## 核心概念
//!
//! - `HttpRouterService`: HTTP路由服务的核心 trait，提供 axum 路由器
//! - `ControlService`: master/worker 控制通道服务，独立的 TCP 连接
//! - `ServiceManager`: 服务管理器，负责管理多个服务的生命周期

pub mod container;
pub mod control;
pub mod http;
pub mod manager;
pub mod trace;

use anyhow::Result;
use async_trait::async_trait;
use axum::Router;
use connecta_common::config::ConnectaConfig;
use connecta_common::{ServiceInfo, ServiceState};
use std::fmt::Debug;
use tracing::info;
use url::Url;

// 重新导出服务实现
pub use control::{MasterService, WorkerLinkService};
pub use http::{RedirectService, SignalingService, WorkerService};

// 重新导出核心组件
pub use container::ServiceContainer;
pub use manager::ServiceManager;

/// HTTP路由服务的核心 trait - 为 axum 提供路由器
#[async_trait]
pub trait HttpRouterService: Send + Sync + Debug {
    /// 获取服务信息
    fn info(&self) -> &ServiceInfo;

    /// 获取可变的服务信息
    fn info_mut(&mut self) -> &mut ServiceInfo;

    /// 构建axum路由器
    async fn build_router(&mut self) -> Result<Router>;

    /// 服务启动回调（路由器已构建并启动后调用）
    async fn on_start(&mut self, base_url: Url) -> Result<()> {
        self.info_mut().set_running(base_url);
        Ok(())
    }

    /// 服务停止回调
    async fn on_stop(&mut self) -> Result<()> {
        info!("HTTP router service '{}' stopped", self.info().name);
        self.info_mut().status = ServiceState::Unknown;
        Ok(())
    }

    /// 获取路由前缀，"/" 表示直接合并到根路由
    fn route_prefix(&self) -> &str;
}

/// master/worker 控制通道服务
#[async_trait]
pub trait ControlService: Send + Sync + Debug {
    /// 获取服务信息
    fn info(&self) -> &ServiceInfo;

    /// 获取可变的服务信息
    fn info_mut(&mut self) -> &mut ServiceInfo;

    /// 运行控制通道直到关闭
    ///
    /// 就绪后通过 `ready_tx` 交回服务信息。
    async fn start(
        &mut self,
        shutdown_rx: tokio::sync::broadcast::Receiver<()>,
        ready_tx: tokio::sync::oneshot::Sender<ServiceInfo>,
    ) -> Result<()>;
}

/// 客户端通过 TLS 接入（开发环境优先使用 HTTP）
pub fn uses_tls(config: &ConnectaConfig) -> bool {
    !(config.is_dev() && config.bind.http.is_some())
}

/// 对外公布的主机名与端口
pub fn public_host_port(config: &ConnectaConfig) -> (String, u16) {
    let http = config.bind.http.as_ref().filter(|_| !uses_tls(config));
    match (http, config.bind.https.as_ref()) {
        (Some(http), _) => (http.domain_name.clone(), http.port),
        (None, Some(https)) => (https.domain_name.clone(), https.port),
        (None, None) => ("localhost".to_string(), 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use connecta_common::config::bind::HttpsBindConfig;

    #[test]
    fn test_public_endpoint_prefers_http_in_dev() {
        let mut config = ConnectaConfig::default();
        assert!(!uses_tls(&config));
        assert_eq!(public_host_port(&config), ("localhost".to_string(), 8080));

        config.env = "prod".to_string();
        config.bind.https = Some(HttpsBindConfig {
            domain_name: "rtc.example.com".to_string(),
            port: 8443,
            ..Default::default()
        });
        assert!(uses_tls(&config));
        assert_eq!(
            public_host_port(&config),
            ("rtc.example.com".to_string(), 8443)
        );
    }
}
