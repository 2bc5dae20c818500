//! 信令服务器 - WebSocket 连接处理
//!
//! 每条 WebSocket 连接拆分为读写两个任务：
//! - 读任务把文本/二进制帧交给 [`ConnectionHandler`]
//! - 写任务消费 [`ChannelSink`] 的指令并写回 socket
//!
//! 单进程模式下 [`SignalingServer`] 直接驱动 [`Hub`]；
//! 分片模式下 worker 与 master 重定向各自实现 [`ConnectionHandler`]。

use async_trait::async_trait;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use bytes::Bytes;
use connecta_common::config::SignalingConfig;
use futures_util::{SinkExt, StreamExt};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::events::HubEvent;
use crate::hub::{Hub, HubOptions};
use crate::registry::{ChannelSink, SinkCommand};
use crate::wire::Frame;

/// 连接事件处理器
#[async_trait]
pub trait ConnectionHandler: Send + Sync + 'static {
    /// 新连接建立
    ///
    /// # 返回
    /// - `Some(id)`: 连接被接纳，后续帧以该 id 分发
    /// - `None`: 处理器不接收该连接的入站帧（如重定向），只保留写通道
    async fn on_open(&self, sink: ChannelSink, client_ip: Option<IpAddr>) -> Option<String>;

    async fn on_text(&self, id: &str, text: &str);

    async fn on_binary(&self, id: &str, data: Bytes);

    async fn on_close(&self, id: &str);
}

/// 单进程信令服务器
#[derive(Debug, Clone)]
pub struct SignalingServer {
    hub: Arc<Mutex<Hub>>,
    events: broadcast::Sender<HubEvent>,
}

impl SignalingServer {
    pub fn new(options: HubOptions) -> Self {
        Self::from_hub(Hub::new(options))
    }

    pub fn from_hub(hub: Hub) -> Self {
        let events = hub.event_sender();
        Self {
            hub: Arc::new(Mutex::new(hub)),
            events,
        }
    }

    pub fn from_config(config: &SignalingConfig) -> Self {
        Self::new(HubOptions::from_config(config))
    }

    /// 共享的 Hub，应用层 API 通过它调用
    pub fn hub(&self) -> &Arc<Mutex<Hub>> {
        &self.hub
    }

    /// 订阅应用事件
    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.events.subscribe()
    }

    /// 启动服务端心跳任务，`secs = 0` 时不启动
    pub fn spawn_keepalive(
        &self,
        secs: u64,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Option<JoinHandle<()>> {
        if secs == 0 {
            return None;
        }

        let hub = self.hub.clone();
        info!("💓 启动服务端心跳，间隔 {}s", secs);
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(secs));
            // 第一次 tick 立即完成
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        hub.lock().await.keepalive_all();
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("心跳任务收到关闭信号");
                        break;
                    }
                }
            }
        }))
    }
}

#[async_trait]
impl ConnectionHandler for SignalingServer {
    async fn on_open(&self, sink: ChannelSink, client_ip: Option<IpAddr>) -> Option<String> {
        Some(self.hub.lock().await.connect(Arc::new(sink), client_ip))
    }

    async fn on_text(&self, id: &str, text: &str) {
        self.hub.lock().await.handle_text(id, text);
    }

    async fn on_binary(&self, id: &str, data: Bytes) {
        self.hub.lock().await.handle_binary(id, &data);
    }

    async fn on_close(&self, id: &str) {
        self.hub.lock().await.disconnect(id);
    }
}

/// 处理一条 WebSocket 连接直到关闭
pub async fn handle_websocket_connection(
    websocket: WebSocket,
    handler: Arc<dyn ConnectionHandler>,
    client_ip: Option<IpAddr>,
) {
    // 分离读写流
    let (mut ws_sender, mut ws_receiver) = websocket.split();

    // 出站指令通道，由 Hub 或处理器持有发送端
    let (tx, mut rx) = mpsc::unbounded_channel();
    let client_id = handler.on_open(ChannelSink::new(tx), client_ip).await;

    match &client_id {
        Some(id) => info!("🔗 新 WebSocket 客户端连接: {} (IP: {:?})", id, client_ip),
        None => debug!("WebSocket 连接未被接纳 (IP: {:?})", client_ip),
    }

    // 处理发送消息的任务
    let send_task = tokio::spawn(async move {
        while let Some(command) = rx.recv().await {
            let message = match command {
                SinkCommand::Frame(Frame::Text(text)) => WsMessage::Text(text.into()),
                SinkCommand::Frame(Frame::Binary(data)) => WsMessage::Binary(data),
                SinkCommand::Close => {
                    let _ = ws_sender.send(WsMessage::Close(None)).await;
                    break;
                }
            };
            if ws_sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let Some(client_id) = client_id else {
        // 仍需读取对端的关闭帧，写任务结束后整条连接随之关闭
        let drain_task = tokio::spawn(async move {
            while let Some(Ok(message)) = ws_receiver.next().await {
                if matches!(message, WsMessage::Close(_)) {
                    break;
                }
            }
        });
        tokio::select! {
            _ = send_task => {},
            _ = drain_task => {},
        }
        return;
    };

    // 处理客户端消息的任务
    let handler_for_receive = handler.clone();
    let id_for_receive = client_id.clone();
    let receive_task = tokio::spawn(async move {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(WsMessage::Text(text)) => {
                    handler_for_receive
                        .on_text(&id_for_receive, text.as_str())
                        .await;
                }
                Ok(WsMessage::Binary(data)) => {
                    handler_for_receive.on_binary(&id_for_receive, data).await;
                }
                Ok(WsMessage::Close(_)) => {
                    info!("客户端 {} 主动断开连接", id_for_receive);
                    break;
                }
                Ok(WsMessage::Ping(_)) | Ok(WsMessage::Pong(_)) => {}
                Err(e) => {
                    warn!("WebSocket 错误 ({}): {}", id_for_receive, e);
                    break;
                }
            }
        }
    });

    // 等待任一任务完成
    tokio::select! {
        result = receive_task => {
            if let Err(e) = result {
                error!("读任务异常退出: {}", e);
            }
        },
        _ = send_task => {},
    }

    handler.on_close(&client_id).await;
    info!("🔌 客户端 {} 已断开连接", client_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ClientSink;

    #[tokio::test]
    async fn test_handler_drives_hub() {
        let server = SignalingServer::new(HubOptions::default());
        let mut events = server.subscribe();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let id = server
            .on_open(ChannelSink::new(tx), None)
            .await
            .unwrap();
        assert!(matches!(rx.recv().await, Some(SinkCommand::Frame(Frame::Text(_)))));
        assert_eq!(events.recv().await.unwrap(), HubEvent::Connected { id: id.clone() });

        server.on_text(&id, "4").await;
        assert_eq!(
            rx.recv().await,
            Some(SinkCommand::Frame(Frame::Text("{\"ev\":-14}".to_string())))
        );

        server.on_close(&id).await;
        assert_eq!(events.recv().await.unwrap(), HubEvent::Disconnected { id });
        assert_eq!(server.hub().lock().await.peer_count(), 0);
    }

    #[tokio::test]
    async fn test_keepalive_task() {
        let server = SignalingServer::new(HubOptions::default());
        assert!(server.spawn_keepalive(0, broadcast::channel(1).1).is_none());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = ChannelSink::new(tx);
        server.hub().lock().await.connect(Arc::new(sink.clone()), None);
        rx.recv().await;

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = server.spawn_keepalive(1, shutdown_rx).unwrap();
        let frame = tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .unwrap();
        assert_eq!(
            frame,
            Some(SinkCommand::Frame(Frame::Text("{\"ev\":-14}".to_string())))
        );

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
        assert!(sink.deliver(Frame::Text("still open".into())));
    }
}
