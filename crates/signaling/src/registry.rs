//! 连接注册表
//!
//! 维护 client id → 连接的映射，并负责点对点发送。
//! 发送目标不存在或已关闭时不会报错，而是返回 [`SendOutcome`]，
//! 由调用方决定是否升级到 master 解析（分片模式）。

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

use crate::hub::ClientBinding;
use crate::wire::Frame;

/// 连接的出站端
///
/// 本进程直连的 WebSocket 使用 [`ChannelSink`]；
/// master 上代表 worker 托管客户端的条目使用控制通道实现。
pub trait ClientSink: Send + Sync + fmt::Debug {
    /// 投递一帧，连接已关闭时返回 false
    fn deliver(&self, frame: Frame) -> bool;

    /// 客户端的房间、句柄或中继列表发生变化
    fn bind(&self, _binding: &ClientBinding) {}

    /// 主动关闭连接
    fn close(&self) {}
}

/// 写任务接收的指令
#[derive(Debug, Clone, PartialEq)]
pub enum SinkCommand {
    Frame(Frame),
    Close,
}

/// 基于 mpsc 通道的出站端，由连接的写任务消费
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: UnboundedSender<SinkCommand>,
}

impl ChannelSink {
    pub fn new(tx: UnboundedSender<SinkCommand>) -> Self {
        Self { tx }
    }
}

impl ClientSink for ChannelSink {
    fn deliver(&self, frame: Frame) -> bool {
        self.tx.send(SinkCommand::Frame(frame)).is_ok()
    }

    fn close(&self) {
        let _ = self.tx.send(SinkCommand::Close);
    }
}

/// 发送结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    /// 连接存在但已关闭
    Closed,
    /// 本进程没有该 id
    Unknown,
}

/// 客户端连接信息
#[derive(Debug)]
pub struct ClientConnection {
    pub id: String,
    pub sink: Arc<dyn ClientSink>,
    pub client_ip: Option<IpAddr>,
    /// 分片模式下托管该连接的 worker 进程 id
    pub owner: Option<u32>,
}

/// 连接注册表
#[derive(Debug)]
pub struct ConnectionRegistry {
    clients: HashMap<String, ClientConnection>,
    salt: u16,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    /// 以当前进程 id 作为 id 盐值
    pub fn new() -> Self {
        Self::with_salt(std::process::id() as u16)
    }

    pub fn with_salt(salt: u16) -> Self {
        Self {
            clients: HashMap::new(),
            salt,
        }
    }

    /// 生成唯一 id：毫秒时间戳 + 随机后缀 + 进程盐值
    pub fn generate_id(&self) -> String {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        loop {
            let id = format!("{millis:x}{:04x}{:04x}", rand::random::<u16>(), self.salt);
            if !self.clients.contains_key(&id) {
                return id;
            }
        }
    }

    /// 注册新连接并返回生成的 id
    pub fn register(&mut self, sink: Arc<dyn ClientSink>, client_ip: Option<IpAddr>) -> String {
        let id = self.generate_id();
        self.insert(id.clone(), sink, client_ip, None);
        id
    }

    /// 以已知 id 注册连接（master 登记 worker 上报的客户端）
    ///
    /// # 返回
    /// - `false`: id 已存在，未做任何修改
    pub fn register_with_id(
        &mut self,
        id: impl Into<String>,
        sink: Arc<dyn ClientSink>,
        owner: Option<u32>,
    ) -> bool {
        let id = id.into();
        if self.clients.contains_key(&id) {
            return false;
        }
        self.insert(id, sink, None, owner);
        true
    }

    fn insert(
        &mut self,
        id: String,
        sink: Arc<dyn ClientSink>,
        client_ip: Option<IpAddr>,
        owner: Option<u32>,
    ) {
        info!("🔗 注册客户端 {} (IP: {:?}, worker: {:?})", id, client_ip, owner);
        self.clients.insert(
            id.clone(),
            ClientConnection {
                id,
                sink,
                client_ip,
                owner,
            },
        );
    }

    /// 移除连接
    pub fn unregister(&mut self, id: &str) -> Option<ClientConnection> {
        let removed = self.clients.remove(id);
        if removed.is_some() {
            info!("🧹 注销客户端 {}", id);
        }
        removed
    }

    pub fn get(&self, id: &str) -> Option<&ClientConnection> {
        self.clients.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.clients.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.clients.keys().cloned().collect()
    }

    /// 某个 worker 托管的全部客户端
    pub fn owned_by(&self, owner: u32) -> Vec<String> {
        self.clients
            .values()
            .filter(|c| c.owner == Some(owner))
            .map(|c| c.id.clone())
            .collect()
    }

    /// 向单个客户端发送
    pub fn send_to(&self, id: &str, frame: Frame) -> SendOutcome {
        match self.clients.get(id) {
            Some(client) if client.sink.deliver(frame) => SendOutcome::Delivered,
            Some(_) => {
                debug!("客户端 {} 连接已关闭，丢弃消息", id);
                SendOutcome::Closed
            }
            None => SendOutcome::Unknown,
        }
    }

    /// 向多个客户端发送，跳过 `except`
    ///
    /// # 返回
    /// 未能投递的 id 列表
    pub fn send_to_many<'a>(
        &self,
        ids: impl IntoIterator<Item = &'a String>,
        frame: &Frame,
        except: Option<&str>,
    ) -> Vec<String> {
        ids.into_iter()
            .filter(|id| Some(id.as_str()) != except)
            .filter(|id| self.send_to(id, frame.clone()) != SendOutcome::Delivered)
            .cloned()
            .collect()
    }

    /// 向所有已注册连接发送
    pub fn broadcast_all(&self, frame: &Frame) {
        for client in self.clients.values() {
            client.sink.deliver(frame.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn channel() -> (Arc<dyn ClientSink>, mpsc::UnboundedReceiver<SinkCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(ChannelSink::new(tx)), rx)
    }

    #[test]
    fn test_register_generates_unique_salted_ids() {
        let mut registry = ConnectionRegistry::with_salt(0xabcd);
        let (sink, _rx) = channel();

        let a = registry.register(sink.clone(), None);
        let b = registry.register(sink, None);
        assert_ne!(a, b);
        assert!(a.ends_with("abcd"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_send_outcomes() {
        let mut registry = ConnectionRegistry::new();
        let (sink, mut rx) = channel();
        let id = registry.register(sink, None);

        assert_eq!(
            registry.send_to(&id, Frame::Text("hi".into())),
            SendOutcome::Delivered
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            SinkCommand::Frame(Frame::Text("hi".into()))
        );

        assert_eq!(
            registry.send_to("missing", Frame::Text("hi".into())),
            SendOutcome::Unknown
        );

        drop(rx);
        assert_eq!(
            registry.send_to(&id, Frame::Text("hi".into())),
            SendOutcome::Closed
        );
    }

    #[test]
    fn test_send_to_many_skips_except_and_reports_failures() {
        let mut registry = ConnectionRegistry::new();
        let (sink_a, mut rx_a) = channel();
        let (sink_b, mut rx_b) = channel();
        let a = registry.register(sink_a, None);
        let b = registry.register(sink_b, None);
        let ghost = "ghost".to_string();

        let failed = registry.send_to_many([&a, &b, &ghost], &Frame::Text("x".into()), Some(&a));
        assert_eq!(failed, vec![ghost]);
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn test_register_with_id_and_owner() {
        let mut registry = ConnectionRegistry::new();
        let (sink, _rx) = channel();

        assert!(registry.register_with_id("a", sink.clone(), Some(7)));
        assert!(!registry.register_with_id("a", sink.clone(), Some(8)));
        assert!(registry.register_with_id("b", sink, Some(8)));

        assert_eq!(registry.owned_by(7), vec!["a".to_string()]);
        assert!(registry.unregister("a").is_some());
        assert!(registry.unregister("a").is_none());
        assert!(registry.owned_by(7).is_empty());
    }
}
