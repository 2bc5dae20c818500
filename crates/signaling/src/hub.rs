//! 协议分发器
//!
//! `Hub` 持有连接注册表、房间目录与中继路由，负责把分类后的入站消息
//! 分发到对应组件，并提供应用层 API（建房、换房、发送事件等）。
//!
//! 所有组件操作都先写入 [`Outbox`]，在一次操作结束时统一 [`Hub::flush`]：
//! 先推送绑定变化，再投递消息，最后发布应用事件。

use bytes::Bytes;
use connecta_common::config::SignalingConfig;
use connecta_common::metrics;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::codec::ByteKind;
use crate::events::HubEvent;
use crate::fallback::FallbackRouter;
use crate::registry::{ClientSink, ConnectionRegistry, SendOutcome};
use crate::room::{RoomConfig, RoomDirectory, RoomError};
use crate::wire::{Envelope, EventName, Frame, Inbound, InternalEvent, WireFormat};

/// 事件通道容量
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// 待投递的一条出站数据
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    /// 由 [`WireFormat`] 编码后发送
    Event(Envelope),
    /// 原样发送
    Frame(Frame),
}

/// 一次操作产生的副作用
#[derive(Debug, Default)]
pub struct Outbox {
    deliveries: Vec<(String, Outgoing)>,
    touched: BTreeSet<String>,
    events: Vec<HubEvent>,
}

impl Outbox {
    pub fn send(&mut self, to: &str, envelope: Envelope) {
        self.deliveries
            .push((to.to_string(), Outgoing::Event(envelope)));
    }

    pub fn send_frame(&mut self, to: &str, frame: Frame) {
        self.deliveries.push((to.to_string(), Outgoing::Frame(frame)));
    }

    pub fn send_many(&mut self, ids: &[String], except: Option<&str>, envelope: Envelope) {
        for id in ids.iter().filter(|id| Some(id.as_str()) != except) {
            self.send(id, envelope.clone());
        }
    }

    /// 标记客户端的绑定（房间、句柄、中继列表）已变化
    pub fn touch(&mut self, id: &str) {
        self.touched.insert(id.to_string());
    }

    pub fn emit(&mut self, event: HubEvent) {
        self.events.push(event);
    }

    pub fn deliveries(&self) -> &[(String, Outgoing)] {
        &self.deliveries
    }

    pub fn touched(&self) -> &BTreeSet<String> {
        &self.touched
    }

    pub fn events(&self) -> &[HubEvent] {
        &self.events
    }

    pub fn is_empty(&self) -> bool {
        self.deliveries.is_empty() && self.touched.is_empty() && self.events.is_empty()
    }
}

/// 客户端当前的路由相关状态
///
/// 分片模式下由 master 推送给托管该客户端的 worker，
/// 使 worker 能在本地完成信令改写与中继扇出。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientBinding {
    pub id: String,
    pub room: Option<String>,
    #[serde(rename = "rtcId")]
    pub rtc_id: Option<u8>,
    #[serde(rename = "byteType")]
    pub byte_kind: ByteKind,
    #[serde(default)]
    pub peers: Vec<String>,
}

/// Hub 构造参数
#[derive(Debug, Clone)]
pub struct HubOptions {
    pub root_room: String,
    pub root_silent: bool,
    pub default_byte_kind: ByteKind,
    pub encode_base64: bool,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self {
            root_room: "/".to_string(),
            root_silent: true,
            default_byte_kind: ByteKind::Uint8,
            encode_base64: false,
        }
    }
}

impl HubOptions {
    pub fn from_config(config: &SignalingConfig) -> Self {
        let default_byte_kind = config.default_byte_kind.parse().unwrap_or_else(|_| {
            warn!(
                "⚠️ 未知的字节类型 '{}'，使用 uint8",
                config.default_byte_kind
            );
            ByteKind::Uint8
        });
        Self {
            root_room: config.root_room.clone(),
            root_silent: config.root_room_silent,
            default_byte_kind,
            encode_base64: config.encode_base64,
        }
    }
}

/// 协议分发器
#[derive(Debug)]
pub struct Hub {
    registry: ConnectionRegistry,
    rooms: RoomDirectory,
    fallback: FallbackRouter,
    wire: WireFormat,
    default_byte_kind: ByteKind,
    events: broadcast::Sender<HubEvent>,
}

impl Hub {
    pub fn new(options: HubOptions) -> Self {
        Self::with_registry(options, ConnectionRegistry::new())
    }

    pub fn with_registry(options: HubOptions, registry: ConnectionRegistry) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            registry,
            rooms: RoomDirectory::new(
                options.root_room,
                options.root_silent,
                options.default_byte_kind,
            ),
            fallback: FallbackRouter::new(),
            wire: WireFormat::new(options.encode_base64),
            default_byte_kind: options.default_byte_kind,
            events,
        }
    }

    /// 事件发送端，可随时 `subscribe`
    pub fn event_sender(&self) -> broadcast::Sender<HubEvent> {
        self.events.clone()
    }

    pub fn wire(&self) -> WireFormat {
        self.wire
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn rooms(&self) -> &RoomDirectory {
        &self.rooms
    }

    pub fn fallback(&self) -> &FallbackRouter {
        &self.fallback
    }

    // ========== 连接生命周期 ==========

    /// 接入新连接：分配 id、发送 connected 事件并加入根房间
    pub fn connect(&mut self, sink: Arc<dyn ClientSink>, client_ip: Option<IpAddr>) -> String {
        let id = self.registry.register(sink, client_ip);
        let mut outbox = Outbox::default();
        outbox.send(
            &id,
            Envelope::new(InternalEvent::Connected, Value::String(id.clone())),
        );
        self.admit(&mut outbox, &id);
        self.flush(outbox);
        id
    }

    /// 以已知 id 接入由 worker 托管的连接
    ///
    /// connected 事件已由 worker 发出，这里只负责加入根房间。
    pub fn connect_with_id(
        &mut self,
        id: &str,
        sink: Arc<dyn ClientSink>,
        owner: Option<u32>,
    ) -> bool {
        if !self.registry.register_with_id(id, sink, owner) {
            warn!("客户端 {} 已存在，忽略重复接入", id);
            return false;
        }
        let mut outbox = Outbox::default();
        self.admit(&mut outbox, id);
        self.flush(outbox);
        true
    }

    fn admit(&mut self, outbox: &mut Outbox, id: &str) {
        outbox.emit(HubEvent::Connected { id: id.to_string() });
        let root = self.rooms.root().to_string();
        if let Err(e) = self
            .rooms
            .add_client(&mut self.fallback, outbox, id, &root)
        {
            warn!("⚠️ 客户端 {} 无法加入根房间: {}", id, e);
        }
    }

    /// 连接关闭：离开房间、清空中继并注销
    pub fn disconnect(&mut self, id: &str) -> bool {
        if !self.registry.contains(id) {
            return false;
        }
        self.registry.unregister(id);
        let mut outbox = Outbox::default();
        self.rooms.remove_client(&mut self.fallback, &mut outbox, id);
        self.fallback.mark_reachable_all(&mut outbox, id);
        outbox.emit(HubEvent::Disconnected { id: id.to_string() });
        self.flush(outbox);
        true
    }

    // ========== 入站消息 ==========

    pub fn handle_text(&mut self, id: &str, text: &str) {
        let inbound = self.wire.decode_text(text);
        self.handle_inbound(id, inbound);
    }

    /// 按发送者所在房间的元素类型解释二进制帧
    pub fn handle_binary(&mut self, id: &str, data: &Bytes) {
        let kind = self
            .rooms
            .room_of(id)
            .map_or(self.default_byte_kind, |room| room.config().byte_kind);
        let inbound = self.wire.decode_binary(data, kind);
        self.handle_inbound(id, inbound);
    }

    pub fn handle_inbound(&mut self, id: &str, inbound: Inbound) {
        if !self.registry.contains(id) {
            debug!("忽略未注册客户端 {} 的消息", id);
            return;
        }

        let mut outbox = Outbox::default();
        match inbound {
            Inbound::Signaling(envelope) => {
                metrics::record_message("signaling");
                self.handle_signaling(&mut outbox, id, envelope);
            }
            Inbound::FallbackRelay(payload) => {
                metrics::record_message("relay");
                let sent = self
                    .fallback
                    .forward(&self.rooms, &mut outbox, id, payload);
                metrics::RELAYED_FRAMES_TOTAL.inc_by(sent as u64);
            }
            Inbound::AppMessage(envelope) => {
                metrics::record_message("app");
                outbox.emit(HubEvent::Message {
                    id: id.to_string(),
                    ev: envelope.ev,
                    data: envelope.data,
                });
            }
            Inbound::Keepalive => {
                metrics::record_message("keepalive");
                outbox.send(id, Envelope::new(InternalEvent::Keepalive, Value::Null));
            }
            Inbound::ByteArray(arr) => {
                metrics::record_message("binary");
                outbox.emit(HubEvent::ByteArray {
                    id: id.to_string(),
                    kind: arr.kind(),
                    values: arr.values().to_vec(),
                });
            }
            Inbound::Raw(payload) => {
                metrics::record_message("raw");
                outbox.emit(HubEvent::RawMessage {
                    id: id.to_string(),
                    payload,
                });
            }
        }
        self.flush(outbox);
    }

    fn handle_signaling(&mut self, outbox: &mut Outbox, id: &str, mut envelope: Envelope) {
        let Some(peer) = envelope.id.take() else {
            debug!("客户端 {} 的信令消息缺少目标 id", id);
            return;
        };

        match envelope.ev.internal() {
            Some(InternalEvent::Sdp | InternalEvent::Ice) => {
                envelope.id = Some(id.to_string());
                envelope.rtc_id = self.rooms.handle_of(id);
                outbox.send(&peer, envelope);
            }
            Some(InternalEvent::RelayDisconnect) => {
                self.fallback
                    .mark_unreachable(&self.rooms, outbox, id, &peer);
            }
            Some(InternalEvent::RelayConnect) => {
                self.fallback.mark_reachable(outbox, id, &peer);
            }
            _ => debug!("忽略信令事件 {} (来自 {})", envelope.ev, id),
        }
    }

    /// 应用一次操作的全部副作用
    fn flush(&mut self, outbox: Outbox) {
        let Outbox {
            deliveries,
            touched,
            events,
        } = outbox;

        for id in &touched {
            if let (Some(conn), Some(binding)) = (self.registry.get(id), self.binding(id)) {
                conn.sink.bind(&binding);
            }
        }

        for (to, outgoing) in deliveries {
            let frame = match outgoing {
                Outgoing::Event(envelope) => self.wire.encode(&envelope),
                Outgoing::Frame(frame) => frame,
            };
            if self.registry.send_to(&to, frame) == SendOutcome::Unknown {
                debug!("目标客户端 {} 不存在，丢弃消息", to);
            }
        }

        metrics::CONNECTIONS.set(self.registry.len() as i64);
        metrics::ROOMS.set(self.rooms.len() as i64);

        for event in events {
            // 没有订阅者时发送失败是正常情况
            let _ = self.events.send(event);
        }
    }

    // ========== 应用 API ==========

    /// 新建房间的默认配置（使用配置中的默认字节类型）
    pub fn default_room_config(&self) -> RoomConfig {
        RoomConfig {
            byte_kind: self.default_byte_kind,
            ..Default::default()
        }
    }

    /// 创建房间，同名房间已存在时返回 false
    pub fn create_room(&mut self, name: &str, params: Value, config: RoomConfig) -> bool {
        let mut outbox = Outbox::default();
        let created = self
            .rooms
            .create_room(&mut outbox, name, params, config)
            .is_some();
        self.flush(outbox);
        created
    }

    pub fn delete_room(&mut self, name: &str) -> Result<bool, RoomError> {
        let mut outbox = Outbox::default();
        let result = self
            .rooms
            .delete_room(&mut self.fallback, &mut outbox, name);
        self.flush(outbox);
        result
    }

    pub fn add_client_to_room(&mut self, id: &str, room: &str) -> Result<Option<u8>, RoomError> {
        if !self.registry.contains(id) {
            return Err(RoomError::ClientNotFound(id.to_string()));
        }
        let mut outbox = Outbox::default();
        let result = self
            .rooms
            .add_client(&mut self.fallback, &mut outbox, id, room);
        self.flush(outbox);
        result
    }

    /// 将客户端移回根房间
    pub fn remove_client_from_room(&mut self, id: &str) -> Result<(), RoomError> {
        let root = self.rooms.root().to_string();
        self.add_client_to_room(id, &root).map(|_| ())
    }

    pub fn transfer_clients(&mut self, from: &str, to: &str) -> Result<usize, RoomError> {
        let mut outbox = Outbox::default();
        let result = self
            .rooms
            .transfer_clients(&mut self.fallback, &mut outbox, from, to);
        if let Ok(moved) = result {
            info!("🔁 {} 个客户端从 {} 转移到 {}", moved, from, to);
        }
        self.flush(outbox);
        result
    }

    /// 更新一对客户端的中继状态（由 worker 上报的 -6/-5 信令）
    pub fn update_relay(&mut self, id: &str, peer: &str, unreachable: bool) -> bool {
        if !self.registry.contains(id) {
            return false;
        }
        let mut outbox = Outbox::default();
        let changed = if unreachable {
            self.fallback
                .mark_unreachable(&self.rooms, &mut outbox, id, peer)
        } else {
            self.fallback.mark_reachable(&mut outbox, id, peer)
        };
        self.flush(outbox);
        changed
    }

    pub fn set_room_params(&mut self, name: &str, params: Value) -> Result<(), RoomError> {
        self.rooms.set_params(name, params)
    }

    pub fn broadcast_room_params(&mut self, name: &str) -> Result<usize, RoomError> {
        let mut outbox = Outbox::default();
        let result = self.rooms.broadcast_params(&mut outbox, name);
        self.flush(outbox);
        result
    }

    /// 向单个客户端发送事件
    pub fn send_event(&self, id: &str, ev: impl Into<EventName>, data: Value) -> SendOutcome {
        let frame = self.wire.encode(&Envelope::new(ev, data));
        self.registry.send_to(id, frame)
    }

    /// 向房间内所有成员发送事件
    ///
    /// # 返回
    /// 成功投递的数量
    pub fn send_event_to_room(
        &self,
        room: &str,
        ev: impl Into<EventName>,
        data: Value,
        except: Option<&str>,
    ) -> Result<usize, RoomError> {
        let members = self
            .rooms
            .get(room)
            .ok_or_else(|| RoomError::RoomNotFound(room.to_string()))?
            .members();
        let frame = self.wire.encode(&Envelope::new(ev, data));
        let targets = members
            .iter()
            .filter(|id| Some(id.as_str()) != except)
            .count();
        let failed = self.registry.send_to_many(members, &frame, except);
        Ok(targets - failed.len())
    }

    /// 向所有连接发送事件
    pub fn broadcast_event(&self, ev: impl Into<EventName>, data: Value) -> usize {
        let frame = self.wire.encode(&Envelope::new(ev, data));
        self.registry.broadcast_all(&frame);
        self.registry.len()
    }

    /// 向所有连接发送心跳
    pub fn keepalive_all(&self) {
        self.broadcast_event(InternalEvent::Keepalive, Value::Null);
    }

    // ========== 查询 ==========

    pub fn room_names(&self) -> Vec<String> {
        self.rooms.names()
    }

    pub fn room_clients(&self, room: &str) -> Option<Vec<String>> {
        self.rooms.get(room).map(|room| room.members().to_vec())
    }

    pub fn client_room(&self, id: &str) -> Option<String> {
        self.rooms.room_of(id).map(|room| room.name().to_string())
    }

    pub fn peer_count(&self) -> usize {
        self.registry.len()
    }

    pub fn peers(&self) -> Vec<String> {
        let mut ids = self.registry.ids();
        ids.sort();
        ids
    }

    pub fn relay_set(&self, id: &str) -> Vec<String> {
        self.fallback.relay_set(id)
    }

    /// 客户端当前的绑定
    pub fn binding(&self, id: &str) -> Option<ClientBinding> {
        if !self.registry.contains(id) {
            return None;
        }
        let room = self.rooms.room_of(id);
        Some(ClientBinding {
            id: id.to_string(),
            room: room.map(|room| room.name().to_string()),
            rtc_id: room.and_then(|room| room.handle_of(id)),
            byte_kind: room.map_or(self.default_byte_kind, |room| room.config().byte_kind),
            peers: self.fallback.relay_set(id),
        })
    }
}
