//! 最小负载重定向
//!
//! master 的公开 WebSocket 端口不承载客户端：连接建立后立即发送
//! `{ev: -1, data: "ws://host:port/path"}`，稍后关闭连接。

use async_trait::async_trait;
use bytes::Bytes;
use connecta_common::metrics;
use serde_json::Value;
use signaling::{
    ChannelSink, ClientSink, ConnectionHandler, Envelope, InternalEvent, WireFormat, WorkerLoad,
};
use std::net::IpAddr;
use std::time::Duration;
use tracing::{info, warn};

use crate::master::MasterCoordinator;

/// 选出连接数最少的 worker，并列时取注册顺序中的第一个
pub fn pick_least_loaded(loads: &[WorkerLoad]) -> Option<&WorkerLoad> {
    let mut best: Option<&WorkerLoad> = None;
    for load in loads {
        if best.is_none_or(|b| load.clients < b.clients) {
            best = Some(load);
        }
    }
    best
}

/// master 公开端口的连接处理器
#[derive(Debug, Clone)]
pub struct RedirectHandler {
    master: MasterCoordinator,
    ws_path: String,
    delay: Duration,
    wire: WireFormat,
    secure: bool,
}

impl RedirectHandler {
    pub fn new(master: MasterCoordinator, ws_path: impl Into<String>, delay: Duration) -> Self {
        let wire = WireFormat::default();
        Self {
            master,
            ws_path: ws_path.into(),
            delay,
            wire,
            secure: false,
        }
    }

    pub fn with_wire(mut self, wire: WireFormat) -> Self {
        self.wire = wire;
        self
    }

    /// 重定向地址使用 `wss://`
    pub fn with_tls(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    fn target_url(&self, worker: &WorkerLoad) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{scheme}://{}:{}{}", worker.host, worker.port, self.ws_path)
    }
}

#[async_trait]
impl ConnectionHandler for RedirectHandler {
    async fn on_open(&self, sink: ChannelSink, client_ip: Option<IpAddr>) -> Option<String> {
        let loads = self.master.worker_loads().await;
        let Some(worker) = pick_least_loaded(&loads) else {
            warn!("⚠️ 没有可用的 worker，关闭来自 {:?} 的连接", client_ip);
            sink.close();
            return None;
        };

        let url = self.target_url(worker);
        info!(
            "↪️ 重定向 {:?} 到 worker {} ({}，{} 个客户端)",
            client_ip, worker.pid, url, worker.clients
        );
        sink.deliver(
            self.wire
                .encode(&Envelope::new(InternalEvent::Redirect, Value::String(url))),
        );
        metrics::REDIRECTS_TOTAL.inc();

        let delay = self.delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            sink.close();
        });
        None
    }

    async fn on_text(&self, _id: &str, _text: &str) {}

    async fn on_binary(&self, _id: &str, _data: Bytes) {}

    async fn on_close(&self, _id: &str) {}
}
