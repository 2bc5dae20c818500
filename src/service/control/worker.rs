//! worker 到 master 的控制链路服务

use crate::service::ControlService;
use anyhow::{Context, Result};
use async_trait::async_trait;
use connecta_common::config::ConnectaConfig;
use connecta_common::{ServiceInfo, ServiceType};
use coordinator::WorkerLink;
use tokio::sync::{broadcast, oneshot};
use url::Url;

#[derive(Debug)]
pub struct WorkerLinkService {
    info: ServiceInfo,
    link: WorkerLink,
}

impl WorkerLinkService {
    pub fn new(config: &ConnectaConfig, link: WorkerLink) -> Self {
        Self {
            info: ServiceInfo::new(
                "Worker Link",
                ServiceType::Worker,
                Some(format!("Control link of worker {}", link.options().pid)),
                config,
            ),
            link,
        }
    }
}

#[async_trait]
impl ControlService for WorkerLinkService {
    fn info(&self) -> &ServiceInfo {
        &self.info
    }

    fn info_mut(&mut self) -> &mut ServiceInfo {
        &mut self.info
    }

    async fn start(
        &mut self,
        shutdown_rx: broadcast::Receiver<()>,
        ready_tx: oneshot::Sender<ServiceInfo>,
    ) -> Result<()> {
        let master_url = format!("tcp://{}", self.link.options().master_addr);
        self.info
            .set_running(Url::parse(&master_url).context("Invalid master URL")?);
        let _ = ready_tx.send(self.info.clone());

        // 未配置重连时，master 不可用会在这里返回错误并触发进程关闭
        self.link.clone().run(shutdown_rx).await?;
        Ok(())
    }
}
