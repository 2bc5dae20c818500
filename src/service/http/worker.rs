//! worker 进程的客户端 WebSocket 服务

use super::health;
use crate::service::HttpRouterService;
use anyhow::Result;
use async_trait::async_trait;
use axum::{Router, routing::get};
use connecta_common::config::ConnectaConfig;
use connecta_common::{ServiceInfo, ServiceType};
use coordinator::WorkerLink;
use signaling::create_connection_router;
use std::sync::Arc;
use tracing::info;

/// worker 的客户端接入，消息经 [`WorkerLink`] 本地处理或上送 master
#[derive(Debug)]
pub struct WorkerService {
    info: ServiceInfo,
    ws_path: String,
    link: WorkerLink,
}

impl WorkerService {
    pub fn new(config: &ConnectaConfig, link: WorkerLink) -> Self {
        Self {
            info: ServiceInfo::new(
                "Worker Signaling Service",
                ServiceType::Signaling,
                Some(format!("Client sockets of worker {}", link.options().pid)),
                config,
            ),
            ws_path: config.signaling.ws_path.clone(),
            link,
        }
    }
}

#[async_trait]
impl HttpRouterService for WorkerService {
    fn info(&self) -> &ServiceInfo {
        &self.info
    }

    fn info_mut(&mut self) -> &mut ServiceInfo {
        &mut self.info
    }

    async fn build_router(&mut self) -> Result<Router> {
        info!(
            "Building Worker router on {} (port {})",
            self.ws_path,
            self.link.options().port
        );
        Ok(Router::new()
            .route("/health", get(health))
            .merge(create_connection_router(
                &self.ws_path,
                Arc::new(self.link.clone()),
            )))
    }

    fn route_prefix(&self) -> &str {
        "/"
    }
}
