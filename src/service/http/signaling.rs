//! Signaling WebSocket服务实现（单进程模式）

use super::health;
use crate::service::{HttpRouterService, public_host_port};
use anyhow::Result;
use async_trait::async_trait;
use axum::{Router, routing::get};
use connecta_common::config::ConnectaConfig;
use connecta_common::{ServiceInfo, ServiceType};
use signaling::{LocalLoad, SignalingServer, create_signaling_router};
use std::sync::Arc;
use tracing::info;

/// Signaling WebSocket服务实现
#[derive(Debug)]
pub struct SignalingService {
    info: ServiceInfo,
    config: ConnectaConfig,
    server: SignalingServer,
}

impl SignalingService {
    pub fn new(config: ConnectaConfig) -> Self {
        Self {
            info: ServiceInfo::new(
                "Signaling Service",
                ServiceType::Signaling,
                Some("WebSocket signaling and server-side relay".to_string()),
                &config,
            ),
            server: SignalingServer::from_config(&config.signaling),
            config,
        }
    }

    /// 应用层 API 与事件订阅的入口
    pub fn server(&self) -> &SignalingServer {
        &self.server
    }
}

#[async_trait]
impl HttpRouterService for SignalingService {
    fn info(&self) -> &ServiceInfo {
        &self.info
    }

    fn info_mut(&mut self) -> &mut ServiceInfo {
        &mut self.info
    }

    async fn build_router(&mut self) -> Result<Router> {
        info!("Building Signaling router");
        let (host, port) = public_host_port(&self.config);
        let load = Arc::new(LocalLoad::new(self.server.clone(), host, port));

        let router = Router::new()
            .route("/health", get(health))
            .merge(create_signaling_router(
                &self.config.signaling,
                self.server.clone(),
                load,
            ));

        info!("Signaling router built successfully");
        Ok(router)
    }

    fn route_prefix(&self) -> &str {
        "/"
    }
}
