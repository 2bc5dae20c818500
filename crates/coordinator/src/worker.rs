//! worker 侧协调
//!
//! worker 承载一部分客户端 WebSocket 连接，并保持一条到 master 的控制连接：
//! - SDP/ICE 改写、中继扇出、心跳在本地完成，所需的句柄与中继列表来自 master 推送的绑定
//! - 本地找不到的目标经 master 转交给托管它的 worker
//! - 其余消息原样上送，由 master 的 Hub 处理
//!
//! 控制连接断开期间 worker 关闭全部客户端并拒绝新连接，直到重新连上 master。

use async_trait::async_trait;
use bytes::Bytes;
use connecta_common::config::ConnectaConfig;
use connecta_common::metrics;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use signaling::wire::{Inbound, MessageType, RelayPayload};
use signaling::{
    ByteKind, ChannelSink, ClientBinding, ClientSink, ConnectionHandler, ConnectionRegistry,
    Envelope, Frame, HubOptions, InternalEvent, SendOutcome, WireFormat,
};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::error::{CoordinatorError, Result};
use crate::frame::ControlCodec;
use crate::protocol::{ClientPayload, ControlMessage, RelayFailUpdate, RelayReport, WorkerHello};

/// worker 运行参数
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// 上报给 master 的进程标识
    pub pid: u32,
    pub master_addr: String,
    /// 重定向时告知客户端的地址
    pub host: String,
    pub port: u16,
    /// `None` 表示断开后不重连
    pub reconnect: Option<Duration>,
    pub wire: WireFormat,
    pub default_byte_kind: ByteKind,
}

impl WorkerOptions {
    pub fn from_config(config: &ConnectaConfig, port: u16) -> Self {
        let hub = HubOptions::from_config(&config.signaling);
        let reconnect_secs = config.coordinator.reconnect_secs;
        Self {
            pid: std::process::id(),
            master_addr: config.coordinator.master_addr(),
            host: config.coordinator.client_host.clone(),
            port,
            reconnect: (reconnect_secs > 0).then(|| Duration::from_secs(reconnect_secs)),
            wire: WireFormat::new(hub.encode_base64),
            default_byte_kind: hub.default_byte_kind,
        }
    }
}

#[derive(Debug)]
struct WorkerState {
    registry: ConnectionRegistry,
    bindings: HashMap<String, ClientBinding>,
    master: Option<mpsc::UnboundedSender<ControlMessage>>,
}

impl WorkerState {
    fn to_master(&self, message: ControlMessage) {
        match &self.master {
            Some(tx) => {
                let _ = tx.send(message);
            }
            None => debug!("master 未连接，丢弃控制消息 {:?}", message.event()),
        }
    }

    fn forward_raw(&self, id: &str, frame: Frame) {
        self.to_master(ControlMessage::EventMessage(ClientPayload::from_frame(id, frame)));
    }

    /// 本地投递，目标不在本进程时交给 master
    fn deliver_or_escalate(&self, target: &str, frame: Frame) {
        if self.registry.contains(target) {
            self.registry.send_to(target, frame);
        } else {
            debug!("目标 {} 不在本 worker，经 master 转交", target);
            self.to_master(ControlMessage::MessageTransfer(ClientPayload::from_frame(
                target, frame,
            )));
        }
    }

    fn relay(&self, from: &str, payload: RelayPayload) -> usize {
        let Some(binding) = self.bindings.get(from) else {
            debug!("客户端 {} 尚无绑定，丢弃中继负载", from);
            return 0;
        };

        let frame = match payload {
            RelayPayload::Text(text) => Frame::Text(text),
            RelayPayload::Binary(mut arr) => {
                arr.retag(
                    binding.rtc_id.unwrap_or_default(),
                    MessageType::FallbackRelay.code(),
                );
                Frame::Binary(arr.to_bytes())
            }
        };
        for peer in &binding.peers {
            self.deliver_or_escalate(peer, frame.clone());
        }
        binding.peers.len()
    }
}

#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    LinkLost,
    Shutdown,
}

/// worker 端的连接处理器与 master 链路
#[derive(Debug, Clone)]
pub struct WorkerLink {
    options: Arc<WorkerOptions>,
    state: Arc<Mutex<WorkerState>>,
}

impl WorkerLink {
    pub fn new(options: WorkerOptions) -> Self {
        let registry = ConnectionRegistry::with_salt(options.pid as u16);
        Self {
            options: Arc::new(options),
            state: Arc::new(Mutex::new(WorkerState {
                registry,
                bindings: HashMap::new(),
                master: None,
            })),
        }
    }

    pub fn options(&self) -> &WorkerOptions {
        &self.options
    }

    pub async fn is_linked(&self) -> bool {
        self.state.lock().await.master.is_some()
    }

    pub async fn client_count(&self) -> usize {
        self.state.lock().await.registry.len()
    }

    /// 向本 worker 的客户端定时发送心跳，`secs = 0` 时不启动
    pub fn spawn_keepalive(
        &self,
        secs: u64,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Option<tokio::task::JoinHandle<()>> {
        if secs == 0 {
            return None;
        }

        let link = self.clone();
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(secs));
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => link.keepalive_all().await,
                    _ = shutdown_rx.recv() => break,
                }
            }
        }))
    }

    async fn keepalive_all(&self) {
        let state = self.state.lock().await;
        let ping = self
            .options
            .wire
            .encode(&Envelope::new(InternalEvent::Keepalive, Value::Null));
        for id in state.registry.ids() {
            state.registry.send_to(&id, ping.clone());
        }
    }

    /// 维持到 master 的控制连接
    ///
    /// 未配置重连时，首次连接失败或断开即返回 [`CoordinatorError::MasterUnavailable`]。
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let addr = self.options.master_addr.clone();
        loop {
            match TcpStream::connect(&addr).await {
                Ok(stream) => {
                    info!("🔗 worker {} 已连接 master {}", self.options.pid, addr);
                    if self.run_session(stream, &mut shutdown_rx).await == SessionEnd::Shutdown {
                        self.go_offline().await;
                        return Ok(());
                    }
                    warn!("⚠️ 与 master {} 的控制连接断开", addr);
                }
                Err(e) => warn!("⚠️ 无法连接 master {}: {}", addr, e),
            }

            self.go_offline().await;
            let Some(delay) = self.options.reconnect else {
                return Err(CoordinatorError::MasterUnavailable(addr));
            };
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_rx.recv() => return Ok(()),
            }
        }
    }

    async fn run_session(
        &self,
        stream: TcpStream,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> SessionEnd {
        let (mut writer, mut reader) = Framed::new(stream, ControlCodec::new()).split();
        let (tx, mut rx) = mpsc::unbounded_channel::<ControlMessage>();

        {
            let mut state = self.state.lock().await;
            let hello = WorkerHello {
                pid: self.options.pid,
                host: self.options.host.clone(),
                port: self.options.port,
                clients: state.registry.ids(),
            };
            // 握手必须是通道上的第一条消息
            let _ = tx.send(ControlMessage::WorkerConnected(hello));
            state.master = Some(tx);
        }

        let mut send_task = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let Err(e) = writer.send(message).await {
                    warn!("写入 master 控制通道失败: {}", e);
                    break;
                }
            }
        });

        let end = loop {
            tokio::select! {
                item = reader.next() => match item {
                    Some(Ok(Ok(message))) => self.on_master_message(message).await,
                    Some(Ok(Err(e))) => warn!("⚠️ 无法解析 master 控制帧: {}", e),
                    Some(Err(e)) => {
                        warn!("master 控制连接读取失败: {}", e);
                        break SessionEnd::LinkLost;
                    }
                    None => break SessionEnd::LinkLost,
                },
                _ = &mut send_task => break SessionEnd::LinkLost,
                _ = shutdown_rx.recv() => break SessionEnd::Shutdown,
            }
        };
        send_task.abort();
        end
    }

    /// 断开 master：关闭并清空全部客户端
    async fn go_offline(&self) {
        let mut state = self.state.lock().await;
        state.master = None;
        let ids = state.registry.ids();
        if !ids.is_empty() {
            info!("🔌 master 不可用，关闭 {} 个客户端连接", ids.len());
        }
        for id in ids {
            if let Some(conn) = state.registry.unregister(&id) {
                conn.sink.close();
            }
        }
        state.bindings.clear();
        metrics::CONNECTIONS.set(0);
    }

    async fn on_master_message(&self, message: ControlMessage) {
        let mut state = self.state.lock().await;
        match message {
            ControlMessage::MessageTransfer(payload) => {
                let id = payload.id.clone();
                match payload.into_frame() {
                    // master 转交的消息不再上送
                    Ok(frame) => {
                        if state.registry.send_to(&id, frame) == SendOutcome::Unknown {
                            debug!("转交目标 {} 已不在本 worker", id);
                        }
                    }
                    Err(e) => warn!("⚠️ 发往 {} 的消息无法还原: {}", id, e),
                }
            }
            ControlMessage::RelayFailUpdate(RelayFailUpdate::Binding(binding)) => {
                if state.registry.contains(&binding.id) {
                    state.bindings.insert(binding.id.clone(), binding);
                }
            }
            other => debug!("忽略 master 发来的控制消息 {:?}", other.event()),
        }
    }

    fn route_signaling(&self, state: &WorkerState, id: &str, text: &str, mut envelope: Envelope) {
        let Some(peer) = envelope.id.take() else {
            debug!("客户端 {} 的信令消息缺少目标 id", id);
            return;
        };

        match envelope.ev.internal() {
            Some(InternalEvent::Sdp | InternalEvent::Ice) => {
                envelope.id = Some(id.to_string());
                envelope.rtc_id = state.bindings.get(id).and_then(|b| b.rtc_id);
                state.deliver_or_escalate(&peer, self.options.wire.encode(&envelope));
            }
            Some(ev @ (InternalEvent::RelayDisconnect | InternalEvent::RelayConnect)) => {
                state.to_master(ControlMessage::RelayFailUpdate(RelayFailUpdate::Report(
                    RelayReport {
                        add: ev == InternalEvent::RelayDisconnect,
                        id1: id.to_string(),
                        id2: peer,
                    },
                )));
            }
            _ => state.forward_raw(id, Frame::Text(text.to_string())),
        }
    }
}

#[async_trait]
impl ConnectionHandler for WorkerLink {
    async fn on_open(&self, sink: ChannelSink, client_ip: Option<IpAddr>) -> Option<String> {
        let mut state = self.state.lock().await;
        if state.master.is_none() {
            debug!("master 未连接，拒绝新连接");
            sink.close();
            return None;
        }

        let sink = Arc::new(sink);
        let id = state.registry.register(sink, client_ip);
        let connected = Envelope::new(InternalEvent::Connected, Value::String(id.clone()));
        state
            .registry
            .send_to(&id, self.options.wire.encode(&connected));
        state.to_master(ControlMessage::ClientConnected(id.clone()));
        metrics::CONNECTIONS.set(state.registry.len() as i64);
        Some(id)
    }

    async fn on_text(&self, id: &str, text: &str) {
        let state = self.state.lock().await;
        if !state.registry.contains(id) {
            return;
        }

        match self.options.wire.decode_text(text) {
            Inbound::Signaling(envelope) => {
                metrics::record_message("signaling");
                self.route_signaling(&state, id, text, envelope);
            }
            Inbound::FallbackRelay(payload) => {
                metrics::record_message("relay");
                let sent = state.relay(id, payload);
                metrics::RELAYED_FRAMES_TOTAL.inc_by(sent as u64);
            }
            Inbound::Keepalive => {
                metrics::record_message("keepalive");
                let pong = Envelope::new(InternalEvent::Keepalive, Value::Null);
                state.registry.send_to(id, self.options.wire.encode(&pong));
            }
            _ => state.forward_raw(id, Frame::Text(text.to_string())),
        }
    }

    async fn on_binary(&self, id: &str, data: Bytes) {
        let state = self.state.lock().await;
        if !state.registry.contains(id) {
            return;
        }

        let kind = state
            .bindings
            .get(id)
            .map_or(self.options.default_byte_kind, |b| b.byte_kind);
        match self.options.wire.decode_binary(&data, kind) {
            Inbound::FallbackRelay(payload) => {
                metrics::record_message("relay");
                let sent = state.relay(id, payload);
                metrics::RELAYED_FRAMES_TOTAL.inc_by(sent as u64);
            }
            _ => state.forward_raw(id, Frame::Binary(data)),
        }
    }

    async fn on_close(&self, id: &str) {
        let mut state = self.state.lock().await;
        if state.registry.unregister(id).is_some() {
            state.bindings.remove(id);
            state.to_master(ControlMessage::ClientDisconnected(id.to_string()));
            metrics::CONNECTIONS.set(state.registry.len() as i64);
        }
    }
}
