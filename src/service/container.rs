//! 服务容器模块 - 封装不同类型的服务

use super::{ControlService, HttpRouterService};
use super::{MasterService, RedirectService, SignalingService, WorkerLinkService, WorkerService};
use axum::Router;
use connecta_common::ServiceInfo;
use url::Url;

/// 服务容器，用于封装不同类型的服务
#[derive(Debug)]
pub enum ServiceContainer {
    Signaling(SignalingService),
    Redirect(RedirectService),
    Worker(WorkerService),
    Master(MasterService),
    WorkerLink(WorkerLinkService),
}

impl ServiceContainer {
    /// 创建单进程 Signaling 服务容器
    pub fn signaling(service: SignalingService) -> Self {
        Self::Signaling(service)
    }

    /// 创建 master 重定向服务容器
    pub fn redirect(service: RedirectService) -> Self {
        Self::Redirect(service)
    }

    /// 创建 worker 客户端服务容器
    pub fn worker(service: WorkerService) -> Self {
        Self::Worker(service)
    }

    /// 创建 master 控制通道服务容器
    pub fn master(service: MasterService) -> Self {
        Self::Master(service)
    }

    /// 创建 worker 控制链路服务容器
    pub fn worker_link(service: WorkerLinkService) -> Self {
        Self::WorkerLink(service)
    }

    pub fn info(&self) -> &ServiceInfo {
        match self {
            ServiceContainer::Signaling(service) => service.info(),
            ServiceContainer::Redirect(service) => service.info(),
            ServiceContainer::Worker(service) => service.info(),
            ServiceContainer::Master(service) => ControlService::info(service),
            ServiceContainer::WorkerLink(service) => ControlService::info(service),
        }
    }

    pub fn is_http_router(&self) -> bool {
        matches!(
            self,
            ServiceContainer::Signaling(_)
                | ServiceContainer::Redirect(_)
                | ServiceContainer::Worker(_)
        )
    }

    pub fn is_control(&self) -> bool {
        matches!(
            self,
            ServiceContainer::Master(_) | ServiceContainer::WorkerLink(_)
        )
    }

    /// 获取路由前缀（仅适用于 HTTP 路由服务）
    pub fn route_prefix(&self) -> Option<&str> {
        self.as_http().map(|service| service.route_prefix())
    }

    /// 构建路由器（仅适用于 HTTP 路由服务）
    pub async fn build_router(&mut self) -> Option<anyhow::Result<Router>> {
        match self.as_http_mut() {
            Some(service) => Some(service.build_router().await),
            None => None,
        }
    }

    /// 服务启动回调（仅适用于 HTTP 路由服务）
    pub async fn on_start(&mut self, base_url: Url) -> Option<anyhow::Result<()>> {
        match self.as_http_mut() {
            Some(service) => Some(service.on_start(base_url).await),
            None => None,
        }
    }

    /// 服务停止回调（仅适用于 HTTP 路由服务）
    pub async fn on_stop(&mut self) -> Option<anyhow::Result<()>> {
        match self.as_http_mut() {
            Some(service) => Some(service.on_stop().await),
            None => None,
        }
    }

    /// 取出控制通道服务
    pub fn into_control(self) -> Option<Box<dyn ControlService>> {
        match self {
            ServiceContainer::Master(service) => {
                Some(Box::new(service) as Box<dyn ControlService>)
            }
            ServiceContainer::WorkerLink(service) => {
                Some(Box::new(service) as Box<dyn ControlService>)
            }
            _ => None,
        }
    }

    fn as_http(&self) -> Option<&dyn HttpRouterService> {
        match self {
            ServiceContainer::Signaling(service) => Some(service as &dyn HttpRouterService),
            ServiceContainer::Redirect(service) => Some(service as &dyn HttpRouterService),
            ServiceContainer::Worker(service) => Some(service as &dyn HttpRouterService),
            _ => None,
        }
    }

    fn as_http_mut(&mut self) -> Option<&mut dyn HttpRouterService> {
        match self {
            ServiceContainer::Signaling(service) => Some(service as &mut dyn HttpRouterService),
            ServiceContainer::Redirect(service) => Some(service as &mut dyn HttpRouterService),
            ServiceContainer::Worker(service) => Some(service as &mut dyn HttpRouterService),
            _ => None,
        }
    }
}
