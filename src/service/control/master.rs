//! master 控制通道服务

use crate::service::ControlService;
use anyhow::{Context, Result};
use async_trait::async_trait;
use connecta_common::config::ConnectaConfig;
use connecta_common::{ServiceInfo, ServiceType};
use coordinator::MasterCoordinator;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, oneshot};
use url::Url;

/// 监听 `coordinator.master_ip:master_port`，接收 worker 连接
#[derive(Debug)]
pub struct MasterService {
    info: ServiceInfo,
    addr: String,
    master: MasterCoordinator,
}

impl MasterService {
    pub fn new(config: &ConnectaConfig, master: MasterCoordinator) -> Self {
        Self {
            info: ServiceInfo::new(
                "Coordinator Service",
                ServiceType::Coordinator,
                Some("Master side of the worker control channel".to_string()),
                config,
            ),
            addr: config.coordinator.master_addr(),
            master,
        }
    }
}

#[async_trait]
impl ControlService for MasterService {
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
        let listener = TcpListener::bind(&self.addr)
            .await
            .with_context(|| format!("Failed to bind master control address {}", self.addr))?;
        let local = listener.local_addr()?;
        self.info
            .set_running(Url::parse(&format!("tcp://{local}")).context("Invalid control URL")?);
        let _ = ready_tx.send(self.info.clone());

        self.master.clone().serve(listener, shutdown_rx).await?;
        Ok(())
    }
}
