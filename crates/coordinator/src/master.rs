//! master 侧协调
//!
//! master 监听控制端口，为每个 worker 连接维护一条写通道。worker 托管的客户端
//! 以 [`WorkerSink`] 登记进 master 的 [`Hub`](signaling::Hub)，Hub 的所有出站消息
//! 和绑定变化都经由它写回对应 worker。

use async_trait::async_trait;
use connecta_common::metrics;
use futures_util::{SinkExt, StreamExt};
use signaling::{
    ClientBinding, ClientSink, Frame, LoadReporter, SendOutcome, SignalingServer, WorkerLoad,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{RwLock, broadcast, mpsc};
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::frame::ControlCodec;
use crate::protocol::{ClientPayload, ControlMessage, RelayFailUpdate, WorkerHello};

/// 通过 worker 控制通道投递的客户端出口
#[derive(Debug, Clone)]
pub struct WorkerSink {
    client_id: String,
    tx: mpsc::UnboundedSender<ControlMessage>,
}

impl WorkerSink {
    pub fn new(client_id: impl Into<String>, tx: mpsc::UnboundedSender<ControlMessage>) -> Self {
        Self {
            client_id: client_id.into(),
            tx,
        }
    }
}

impl ClientSink for WorkerSink {
    fn deliver(&self, frame: Frame) -> bool {
        self.tx
            .send(ControlMessage::MessageTransfer(ClientPayload::from_frame(
                self.client_id.clone(),
                frame,
            )))
            .is_ok()
    }

    fn bind(&self, binding: &ClientBinding) {
        let _ = self
            .tx
            .send(ControlMessage::RelayFailUpdate(RelayFailUpdate::Binding(
                binding.clone(),
            )));
    }
}

/// 已注册的 worker
#[derive(Debug, Clone)]
struct WorkerEntry {
    pid: u32,
    host: String,
    port: u16,
    // 同一 pid 重连时区分新旧连接
    session: u64,
}

/// master 协调器
#[derive(Debug, Clone)]
pub struct MasterCoordinator {
    server: SignalingServer,
    workers: Arc<RwLock<Vec<WorkerEntry>>>,
    sessions: Arc<AtomicU64>,
}

impl MasterCoordinator {
    pub fn new(server: SignalingServer) -> Self {
        Self {
            server,
            workers: Arc::new(RwLock::new(Vec::new())),
            sessions: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn server(&self) -> &SignalingServer {
        &self.server
    }

    pub async fn worker_count(&self) -> usize {
        self.workers.read().await.len()
    }

    /// 按注册顺序列出各 worker 的负载
    pub async fn worker_loads(&self) -> Vec<WorkerLoad> {
        let workers: Vec<(u32, String, u16)> = self
            .workers
            .read()
            .await
            .iter()
            .map(|w| (w.pid, w.host.clone(), w.port))
            .collect();

        let hub = self.server.hub().lock().await;
        workers
            .into_iter()
            .map(|(pid, host, port)| WorkerLoad {
                clients: hub.registry().owned_by(pid).len(),
                pid,
                host,
                port,
            })
            .collect()
    }

    /// 接受 worker 控制连接直到收到关闭信号
    pub async fn serve(
        self,
        listener: TcpListener,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<()> {
        info!("🧭 master 控制通道监听于 {}", listener.local_addr()?);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let master = self.clone();
                            tokio::spawn(async move {
                                master.handle_worker(stream, peer).await;
                            });
                        }
                        Err(e) => {
                            error!("接受 worker 连接失败: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("master 控制通道收到关闭信号");
                    break;
                }
            }
        }
        Ok(())
    }

    async fn handle_worker(&self, stream: TcpStream, peer: SocketAddr) {
        debug!("worker 控制连接来自 {}", peer);
        let session = self.sessions.fetch_add(1, Ordering::Relaxed);
        let (mut writer, mut reader) = Framed::new(stream, ControlCodec::new()).split();
        let (tx, mut rx) = mpsc::unbounded_channel::<ControlMessage>();

        let send_task = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let Err(e) = writer.send(message).await {
                    warn!("写入 worker 控制通道失败: {}", e);
                    break;
                }
            }
        });

        let mut pid = None;
        while let Some(item) = reader.next().await {
            match item {
                Ok(Ok(message)) => self.on_message(&mut pid, session, &tx, message).await,
                Ok(Err(e)) => warn!("⚠️ 无法解析来自 {} 的控制帧: {}", peer, e),
                Err(e) => {
                    warn!("worker 控制连接 {} 读取失败: {}", peer, e);
                    break;
                }
            }
        }

        if let Some(pid) = pid {
            self.remove_worker(pid, session).await;
        } else {
            debug!("未握手的控制连接 {} 已关闭", peer);
        }
        send_task.abort();
    }

    async fn on_message(
        &self,
        pid: &mut Option<u32>,
        session: u64,
        tx: &mpsc::UnboundedSender<ControlMessage>,
        message: ControlMessage,
    ) {
        if let ControlMessage::WorkerConnected(hello) = message {
            *pid = Some(hello.pid);
            self.register_worker(hello, session, tx.clone()).await;
            return;
        }
        let Some(pid) = *pid else {
            warn!("⚠️ 握手前收到控制消息 {:?}，忽略", message.event());
            return;
        };

        match message {
            ControlMessage::ClientConnected(id) => {
                let sink = Arc::new(WorkerSink::new(id.clone(), tx.clone()));
                self.server
                    .hub()
                    .lock()
                    .await
                    .connect_with_id(&id, sink, Some(pid));
            }
            ControlMessage::ClientDisconnected(id) => {
                self.server.hub().lock().await.disconnect(&id);
            }
            ControlMessage::EventMessage(payload) => {
                let id = payload.id.clone();
                match payload.into_frame() {
                    Ok(Frame::Text(text)) => self.server.hub().lock().await.handle_text(&id, &text),
                    Ok(Frame::Binary(data)) => {
                        self.server.hub().lock().await.handle_binary(&id, &data)
                    }
                    Err(e) => warn!("⚠️ 客户端 {} 的消息无法还原: {}", id, e),
                }
            }
            ControlMessage::MessageTransfer(payload) => {
                // worker 本地找不到目标，交由 master 路由到托管它的 worker
                let id = payload.id.clone();
                let frame = match payload.into_frame() {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!("⚠️ 转发给 {} 的消息无法还原: {}", id, e);
                        return;
                    }
                };
                let outcome = self.server.hub().lock().await.registry().send_to(&id, frame);
                if outcome == SendOutcome::Unknown {
                    debug!("转发目标 {} 不存在，丢弃", id);
                }
            }
            ControlMessage::RelayFailUpdate(RelayFailUpdate::Report(report)) => {
                self.server
                    .hub()
                    .lock()
                    .await
                    .update_relay(&report.id1, &report.id2, report.add);
            }
            ControlMessage::RelayFailUpdate(RelayFailUpdate::Binding(binding)) => {
                debug!("忽略 worker {} 发来的绑定 {}", pid, binding.id);
            }
            ControlMessage::WorkerConnected(_) => {}
        }
    }

    async fn register_worker(
        &self,
        hello: WorkerHello,
        session: u64,
        tx: mpsc::UnboundedSender<ControlMessage>,
    ) {
        let replaced = {
            let mut workers = self.workers.write().await;
            let entry = WorkerEntry {
                pid: hello.pid,
                host: hello.host.clone(),
                port: hello.port,
                session,
            };
            let replaced = match workers.iter_mut().find(|w| w.pid == hello.pid) {
                Some(existing) => {
                    *existing = entry;
                    true
                }
                None => {
                    workers.push(entry);
                    false
                }
            };
            metrics::WORKERS.set(workers.len() as i64);
            replaced
        };

        info!(
            "🧩 worker {} 已注册: {}:{} ({} 个存活客户端)",
            hello.pid,
            hello.host,
            hello.port,
            hello.clients.len()
        );

        let mut hub = self.server.hub().lock().await;
        if replaced {
            for id in hub.registry().owned_by(hello.pid) {
                hub.disconnect(&id);
            }
        }
        for id in hello.clients {
            let sink = Arc::new(WorkerSink::new(id.clone(), tx.clone()));
            hub.connect_with_id(&id, sink, Some(hello.pid));
        }
    }

    async fn remove_worker(&self, pid: u32, session: u64) {
        {
            let mut workers = self.workers.write().await;
            let before = workers.len();
            workers.retain(|w| !(w.pid == pid && w.session == session));
            if workers.len() == before {
                // 同一 pid 已经以新连接重新注册
                return;
            }
            metrics::WORKERS.set(workers.len() as i64);
        }

        let mut hub = self.server.hub().lock().await;
        let owned = hub.registry().owned_by(pid);
        info!("🔌 worker {} 断开，清理 {} 个客户端", pid, owned.len());
        for id in owned {
            hub.disconnect(&id);
        }
    }
}

#[async_trait]
impl LoadReporter for MasterCoordinator {
    async fn server_load(&self) -> Vec<WorkerLoad> {
        self.worker_loads().await
    }
}
