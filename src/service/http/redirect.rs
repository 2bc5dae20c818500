//! master 公开端口：最小负载重定向与管理接口

use super::health;
use crate::service::{HttpRouterService, uses_tls};
use anyhow::Result;
use async_trait::async_trait;
use axum::{Router, routing::get};
use connecta_common::config::ConnectaConfig;
use connecta_common::{ServiceInfo, ServiceType};
use coordinator::{MasterCoordinator, RedirectHandler};
use signaling::{HubAdmin, WireFormat, create_admin_router, create_connection_router};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// 重定向服务
///
/// 客户端连接被引导到负载最低的 worker；管理接口与 `/load`
/// 直接操作 master 持有的全局 Hub。
#[derive(Debug)]
pub struct RedirectService {
    info: ServiceInfo,
    config: ConnectaConfig,
    master: MasterCoordinator,
}

impl RedirectService {
    pub fn new(config: ConnectaConfig, master: MasterCoordinator) -> Self {
        Self {
            info: ServiceInfo::new(
                "Redirect Service",
                ServiceType::Redirect,
                Some("Redirects clients to the least-loaded worker".to_string()),
                &config,
            ),
            config,
            master,
        }
    }
}

#[async_trait]
impl HttpRouterService for RedirectService {
    fn info(&self) -> &ServiceInfo {
        &self.info
    }

    fn info_mut(&mut self) -> &mut ServiceInfo {
        &mut self.info
    }

    async fn build_router(&mut self) -> Result<Router> {
        let signaling = &self.config.signaling;
        let coordinator = &self.config.coordinator;
        info!(
            "Building Redirect router on {} (delay {}ms)",
            signaling.ws_path, coordinator.redirect_delay_ms
        );

        let handler = RedirectHandler::new(
            self.master.clone(),
            signaling.ws_path.clone(),
            Duration::from_millis(coordinator.redirect_delay_ms),
        )
        .with_wire(WireFormat::new(signaling.encode_base64))
        .with_tls(uses_tls(&self.config));

        let load = Arc::new(self.master.clone());
        let admin = Arc::new(HubAdmin::new(self.master.server().clone(), load.clone()));
        let root_key = if signaling.is_admin_enabled() {
            signaling.admin_root_key.trim()
        } else {
            ""
        };

        Ok(Router::new()
            .route("/health", get(health))
            .merge(create_connection_router(&signaling.ws_path, Arc::new(handler)))
            .merge(create_admin_router(root_key, admin, load)))
    }

    fn route_prefix(&self) -> &str {
        "/"
    }
}
