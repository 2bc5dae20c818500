//! 房间目录
//!
//! 管理房间、成员关系与房间内句柄分配。一个客户端同一时刻最多属于一个房间，
//! 换房间时先离开旧房间再加入新房间。根房间始终存在且不会被自动删除。

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::codec::ByteKind;
use crate::events::HubEvent;
use crate::fallback::FallbackRouter;
use crate::hub::Outbox;
use crate::wire::{Envelope, InternalEvent};

/// 房间内句柄上限（二进制帧中以单个元素携带）
pub const MAX_HANDLE: u8 = 127;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoomError {
    #[error("room not found: {0}")]
    RoomNotFound(String),

    #[error("client not found: {0}")]
    ClientNotFound(String),

    #[error("room '{0}' has no free handle (max {MAX_HANDLE} tagged members)")]
    RoomFull(String),

    #[error("the root room cannot be deleted")]
    RootRoom,
}

/// 房间配置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomConfig {
    #[serde(rename = "useRTC")]
    pub use_rtc: bool,
    #[serde(rename = "rtcFallback")]
    pub fallback: bool,
    pub auto_delete: bool,
    pub silent: bool,
    #[serde(rename = "byteType")]
    pub byte_kind: ByteKind,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            use_rtc: false,
            fallback: false,
            auto_delete: false,
            silent: false,
            byte_kind: ByteKind::Uint8,
        }
    }
}

impl RoomConfig {
    /// 需要为成员分配句柄的房间
    pub fn uses_handles(&self) -> bool {
        self.use_rtc || self.fallback
    }
}

/// 房间
#[derive(Debug, Clone)]
pub struct Room {
    name: String,
    params: Value,
    config: RoomConfig,
    /// 按加入顺序排列
    members: Vec<String>,
    handles: HashMap<String, u8>,
}

impl Room {
    fn new(name: String, params: Value, config: RoomConfig) -> Self {
        Self {
            name,
            params,
            config,
            members: Vec::new(),
            handles: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &Value {
        &self.params
    }

    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    pub fn members(&self) -> &[String] {
        &self.members
    }

    pub fn contains(&self, id: &str) -> bool {
        self.members.iter().any(|m| m == id)
    }

    pub fn handle_of(&self, id: &str) -> Option<u8> {
        self.handles.get(id).copied()
    }

    /// 1..=127 中最小的未使用句柄
    pub fn next_handle(&self) -> Option<u8> {
        (1..=MAX_HANDLE).find(|h| !self.handles.values().any(|used| used == h))
    }

    fn roster(&self) -> Value {
        Value::Array(
            self.members
                .iter()
                .map(|id| json!({ "id": id, "rtcId": self.handle_of(id) }))
                .collect(),
        )
    }
}

/// 房间目录
#[derive(Debug)]
pub struct RoomDirectory {
    rooms: HashMap<String, Room>,
    /// client id → 所在房间
    client_rooms: HashMap<String, String>,
    root: String,
}

impl RoomDirectory {
    /// 创建目录并建立根房间
    pub fn new(root: impl Into<String>, root_silent: bool, byte_kind: ByteKind) -> Self {
        let root = root.into();
        let config = RoomConfig {
            silent: root_silent,
            byte_kind,
            ..Default::default()
        };
        let mut rooms = HashMap::new();
        rooms.insert(root.clone(), Room::new(root.clone(), Value::Null, config));
        Self {
            rooms,
            client_rooms: HashMap::new(),
            root,
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn get(&self, name: &str) -> Option<&Room> {
        self.rooms.get(name)
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.rooms.keys().cloned().collect();
        names.sort();
        names
    }

    /// 客户端所在房间
    pub fn room_of(&self, id: &str) -> Option<&Room> {
        self.client_rooms.get(id).and_then(|name| self.rooms.get(name))
    }

    pub fn handle_of(&self, id: &str) -> Option<u8> {
        self.room_of(id).and_then(|room| room.handle_of(id))
    }

    /// 两个客户端是否位于同一个启用了中继的房间
    pub fn share_fallback_room(&self, a: &str, b: &str) -> bool {
        match (self.client_rooms.get(a), self.client_rooms.get(b)) {
            (Some(ra), Some(rb)) if ra == rb => self
                .rooms
                .get(ra)
                .is_some_and(|room| room.config.fallback),
            _ => false,
        }
    }

    /// 创建房间
    ///
    /// # 返回
    /// - `None`: 同名房间已存在，未做任何修改
    pub fn create_room(
        &mut self,
        outbox: &mut Outbox,
        name: &str,
        params: Value,
        config: RoomConfig,
    ) -> Option<&Room> {
        if self.rooms.contains_key(name) {
            warn!("房间 {} 已存在，忽略创建请求", name);
            return None;
        }

        info!("🏠 创建房间 {} ({:?})", name, config);
        self.rooms
            .insert(name.to_string(), Room::new(name.to_string(), params, config));
        outbox.emit(HubEvent::RoomCreated {
            name: name.to_string(),
        });
        self.rooms.get(name)
    }

    /// 删除房间，剩余成员先转移到根房间
    ///
    /// # 返回
    /// - `Ok(false)`: 房间不存在
    pub fn delete_room(
        &mut self,
        fallback: &mut FallbackRouter,
        outbox: &mut Outbox,
        name: &str,
    ) -> Result<bool, RoomError> {
        if name == self.root {
            return Err(RoomError::RootRoom);
        }
        let Some(room) = self.rooms.get(name) else {
            return Ok(false);
        };

        let root = self.root.clone();
        for id in room.members.clone() {
            if let Err(e) = self.add_client(fallback, outbox, &id, &root) {
                warn!("⚠️ 无法将 {} 转移到根房间: {}", id, e);
                self.remove_client(fallback, outbox, &id);
            }
        }

        // 成员离开后房间可能已被自动删除
        if self.rooms.remove(name).is_some() {
            info!("🗑️ 删除房间 {}", name);
            outbox.emit(HubEvent::RoomDeleted {
                name: name.to_string(),
            });
        }
        Ok(true)
    }

    /// 将客户端加入房间，已在其他房间时先离开
    ///
    /// 目标房间需要句柄且已满时返回 [`RoomError::RoomFull`]，客户端保持在原房间。
    ///
    /// # 返回
    /// 分配到的句柄（不需要句柄的房间为 `None`）
    pub fn add_client(
        &mut self,
        fallback: &mut FallbackRouter,
        outbox: &mut Outbox,
        id: &str,
        room_name: &str,
    ) -> Result<Option<u8>, RoomError> {
        let target = self
            .rooms
            .get(room_name)
            .ok_or_else(|| RoomError::RoomNotFound(room_name.to_string()))?;

        if self.client_rooms.get(id).map(String::as_str) == Some(room_name) {
            debug!("客户端 {} 已在房间 {}", id, room_name);
            return Ok(target.handle_of(id));
        }

        let handle = if target.config.uses_handles() {
            Some(
                target
                    .next_handle()
                    .ok_or_else(|| RoomError::RoomFull(room_name.to_string()))?,
            )
        } else {
            None
        };

        if self.client_rooms.contains_key(id) {
            self.remove_client(fallback, outbox, id);
        }

        // 目标房间不是旧房间，不会因旧房间自动删除而消失
        let Some(room) = self.rooms.get_mut(room_name) else {
            return Err(RoomError::RoomNotFound(room_name.to_string()));
        };
        let existing = room.members.clone();
        room.members.push(id.to_string());
        if let Some(handle) = handle {
            room.handles.insert(id.to_string(), handle);
        }
        self.client_rooms
            .insert(id.to_string(), room_name.to_string());
        info!("🚪 客户端 {} 加入房间 {} (句柄 {:?})", id, room_name, handle);

        let Some(room) = self.rooms.get(room_name) else {
            return Err(RoomError::RoomNotFound(room_name.to_string()));
        };
        let config = room.config;
        if !config.silent {
            let mut joined = json!({
                "room": room.name,
                "rtcId": handle,
                "useRTC": config.use_rtc,
                "rtcFallback": config.fallback,
                "byteType": config.byte_kind,
                "params": room.params,
            });
            if config.use_rtc && config.fallback {
                joined["users"] = room.roster();
            }
            outbox.send(id, Envelope::new(InternalEvent::JoinedRoom, joined));
            outbox.send_many(
                &existing,
                None,
                Envelope::new(
                    InternalEvent::UserJoined,
                    json!({ "id": id, "rtcId": handle }),
                ),
            );
        }

        if config.fallback {
            fallback.mark_unreachable_many(self, outbox, id, &existing);
        }

        outbox.touch(id);
        Ok(handle)
    }

    /// 将客户端移出所在房间，释放句柄并清空其中继列表
    ///
    /// # 返回
    /// 客户端离开的房间名
    pub fn remove_client(
        &mut self,
        fallback: &mut FallbackRouter,
        outbox: &mut Outbox,
        id: &str,
    ) -> Option<String> {
        let room_name = self.client_rooms.remove(id)?;
        fallback.mark_reachable_all(outbox, id);

        let room = self.rooms.get_mut(&room_name)?;
        room.members.retain(|m| m != id);
        room.handles.remove(id);
        info!("🚪 客户端 {} 离开房间 {}", id, room_name);

        if !room.config.silent {
            outbox.send(
                id,
                Envelope::new(InternalEvent::LeftRoom, Value::String(room_name.clone())),
            );
            outbox.send_many(
                &room.members,
                None,
                Envelope::new(InternalEvent::UserLeft, Value::String(id.to_string())),
            );
        }
        outbox.touch(id);

        if room.config.auto_delete && room.members.is_empty() && room_name != self.root {
            self.rooms.remove(&room_name);
            info!("🗑️ 自动删除空房间 {}", room_name);
            outbox.emit(HubEvent::RoomDeleted {
                name: room_name.clone(),
            });
        }

        Some(room_name)
    }

    /// 将 `from` 的全部成员转移到 `to`，`from` 为自动删除房间时随后删除
    ///
    /// # 返回
    /// 成功转移的客户端数量
    pub fn transfer_clients(
        &mut self,
        fallback: &mut FallbackRouter,
        outbox: &mut Outbox,
        from: &str,
        to: &str,
    ) -> Result<usize, RoomError> {
        if !self.rooms.contains_key(to) {
            return Err(RoomError::RoomNotFound(to.to_string()));
        }
        let members = self
            .rooms
            .get(from)
            .map(|room| room.members.clone())
            .ok_or_else(|| RoomError::RoomNotFound(from.to_string()))?;

        let mut moved = 0;
        for id in &members {
            match self.add_client(fallback, outbox, id, to) {
                Ok(_) => moved += 1,
                Err(e) => warn!("⚠️ 转移 {} 到 {} 失败: {}", id, to, e),
            }
        }

        let auto_delete = self
            .rooms
            .get(from)
            .is_some_and(|room| room.config.auto_delete);
        if auto_delete {
            self.delete_room(fallback, outbox, from)?;
        }
        Ok(moved)
    }

    /// 更新房间参数
    pub fn set_params(&mut self, name: &str, params: Value) -> Result<(), RoomError> {
        let room = self
            .rooms
            .get_mut(name)
            .ok_or_else(|| RoomError::RoomNotFound(name.to_string()))?;
        room.params = params;
        Ok(())
    }

    /// 向房间全部成员重新发送参数
    pub fn broadcast_params(&self, outbox: &mut Outbox, name: &str) -> Result<usize, RoomError> {
        let room = self
            .rooms
            .get(name)
            .ok_or_else(|| RoomError::RoomNotFound(name.to_string()))?;
        outbox.send_many(
            &room.members,
            None,
            Envelope::new(InternalEvent::RoomParams, room.params.clone()),
        );
        Ok(room.members.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::Outgoing;
    use crate::wire::EventName;

    fn setup() -> (RoomDirectory, FallbackRouter, Outbox) {
        (
            RoomDirectory::new("/", true, ByteKind::Uint8),
            FallbackRouter::new(),
            Outbox::default(),
        )
    }

    fn rtc_room() -> RoomConfig {
        RoomConfig {
            use_rtc: true,
            fallback: true,
            ..Default::default()
        }
    }

    fn events_to<'a>(outbox: &'a Outbox, id: &str) -> Vec<&'a Envelope> {
        outbox
            .deliveries()
            .iter()
            .filter(|(to, _)| to == id)
            .filter_map(|(_, out)| match out {
                Outgoing::Event(env) => Some(env),
                Outgoing::Frame(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_create_room_is_unique() {
        let (mut rooms, _, mut outbox) = setup();
        assert!(rooms
            .create_room(&mut outbox, "lobby", Value::Null, RoomConfig::default())
            .is_some());
        assert!(rooms
            .create_room(&mut outbox, "lobby", Value::Null, RoomConfig::default())
            .is_none());
        assert_eq!(
            outbox.events(),
            &[HubEvent::RoomCreated {
                name: "lobby".to_string()
            }]
        );
        assert_eq!(rooms.len(), 2);
    }

    #[test]
    fn test_client_is_in_at_most_one_room() {
        let (mut rooms, mut fallback, mut outbox) = setup();
        rooms.create_room(&mut outbox, "a", Value::Null, RoomConfig::default());
        rooms.create_room(&mut outbox, "b", Value::Null, RoomConfig::default());

        rooms.add_client(&mut fallback, &mut outbox, "c1", "/").unwrap();
        rooms.add_client(&mut fallback, &mut outbox, "c1", "a").unwrap();
        rooms.add_client(&mut fallback, &mut outbox, "c1", "b").unwrap();

        let containing: Vec<_> = rooms
            .names()
            .into_iter()
            .filter(|name| rooms.get(name).unwrap().contains("c1"))
            .collect();
        assert_eq!(containing, vec!["b".to_string()]);
        assert_eq!(rooms.room_of("c1").unwrap().name(), "b");
    }

    #[test]
    fn test_smallest_unused_handle() {
        let (mut rooms, mut fallback, mut outbox) = setup();
        rooms.create_room(&mut outbox, "rtc", Value::Null, rtc_room());

        for id in ["h1", "h2", "h3"] {
            rooms.add_client(&mut fallback, &mut outbox, id, "rtc").unwrap();
        }
        assert_eq!(rooms.handle_of("h2"), Some(2));

        rooms.remove_client(&mut fallback, &mut outbox, "h2");
        assert_eq!(
            rooms.add_client(&mut fallback, &mut outbox, "h4", "rtc"),
            Ok(Some(2))
        );
    }

    #[test]
    fn test_room_full_keeps_client_in_previous_room() {
        let (mut rooms, mut fallback, mut outbox) = setup();
        let config = RoomConfig {
            use_rtc: true,
            ..Default::default()
        };
        rooms.create_room(&mut outbox, "rtc", Value::Null, config);

        for i in 0..MAX_HANDLE {
            let handle = rooms
                .add_client(&mut fallback, &mut outbox, &format!("c{i}"), "rtc")
                .unwrap();
            assert_eq!(handle, Some(i + 1));
        }

        rooms.add_client(&mut fallback, &mut outbox, "late", "/").unwrap();
        assert_eq!(
            rooms.add_client(&mut fallback, &mut outbox, "late", "rtc"),
            Err(RoomError::RoomFull("rtc".to_string()))
        );
        assert_eq!(rooms.room_of("late").unwrap().name(), "/");
    }

    #[test]
    fn test_join_notifications() {
        let (mut rooms, mut fallback, mut outbox) = setup();
        rooms.create_room(&mut outbox, "rtc", serde_json::json!({"topic": "x"}), rtc_room());

        rooms.add_client(&mut fallback, &mut outbox, "a", "rtc").unwrap();
        rooms.add_client(&mut fallback, &mut outbox, "b", "rtc").unwrap();

        let to_b = events_to(&outbox, "b");
        let joined = to_b
            .iter()
            .find(|env| env.ev == EventName::from(InternalEvent::JoinedRoom))
            .unwrap();
        assert_eq!(joined.data["room"], "rtc");
        assert_eq!(joined.data["rtcId"], 2);
        assert_eq!(joined.data["params"]["topic"], "x");
        assert_eq!(joined.data["users"].as_array().unwrap().len(), 2);

        let to_a = events_to(&outbox, "a");
        assert!(to_a.iter().any(|env| env.ev == EventName::from(InternalEvent::UserJoined)
            && env.data["id"] == "b"
            && env.data["rtcId"] == 2));
    }

    #[test]
    fn test_silent_root_sends_nothing() {
        let (mut rooms, mut fallback, mut outbox) = setup();
        rooms.add_client(&mut fallback, &mut outbox, "a", "/").unwrap();
        rooms.add_client(&mut fallback, &mut outbox, "b", "/").unwrap();
        rooms.remove_client(&mut fallback, &mut outbox, "a");
        assert!(outbox.deliveries().is_empty());
        assert_eq!(rooms.handle_of("b"), None);
    }

    #[test]
    fn test_leave_notifications() {
        let (mut rooms, mut fallback, mut outbox) = setup();
        rooms.create_room(&mut outbox, "chat", Value::Null, RoomConfig::default());
        rooms.add_client(&mut fallback, &mut outbox, "a", "chat").unwrap();
        rooms.add_client(&mut fallback, &mut outbox, "b", "chat").unwrap();

        let mut outbox = Outbox::default();
        assert_eq!(
            rooms.remove_client(&mut fallback, &mut outbox, "a"),
            Some("chat".to_string())
        );
        assert_eq!(
            events_to(&outbox, "a")[0],
            &Envelope::new(InternalEvent::LeftRoom, Value::String("chat".into()))
        );
        assert_eq!(
            events_to(&outbox, "b")[0],
            &Envelope::new(InternalEvent::UserLeft, Value::String("a".into()))
        );
    }

    #[test]
    fn test_delete_room_moves_members_to_root() {
        let (mut rooms, mut fallback, mut outbox) = setup();
        rooms.create_room(&mut outbox, "game", Value::Null, RoomConfig::default());
        rooms.add_client(&mut fallback, &mut outbox, "a", "game").unwrap();
        rooms.add_client(&mut fallback, &mut outbox, "b", "game").unwrap();

        assert_eq!(rooms.delete_room(&mut fallback, &mut outbox, "game"), Ok(true));
        assert!(rooms.get("game").is_none());
        assert_eq!(rooms.get("/").unwrap().members(), &["a", "b"]);
        assert_eq!(
            outbox
                .events()
                .iter()
                .filter(|e| matches!(e, HubEvent::RoomDeleted { .. }))
                .count(),
            1
        );

        assert_eq!(rooms.delete_room(&mut fallback, &mut outbox, "game"), Ok(false));
        assert_eq!(
            rooms.delete_room(&mut fallback, &mut outbox, "/"),
            Err(RoomError::RootRoom)
        );
    }

    #[test]
    fn test_auto_delete_room_on_last_leave() {
        let (mut rooms, mut fallback, mut outbox) = setup();
        let config = RoomConfig {
            auto_delete: true,
            ..Default::default()
        };
        rooms.create_room(&mut outbox, "tmp", Value::Null, config);
        rooms.add_client(&mut fallback, &mut outbox, "a", "tmp").unwrap();
        rooms.add_client(&mut fallback, &mut outbox, "a", "/").unwrap();

        assert!(rooms.get("tmp").is_none());
        assert!(outbox.events().contains(&HubEvent::RoomDeleted {
            name: "tmp".to_string()
        }));
    }

    #[test]
    fn test_transfer_clients() {
        let (mut rooms, mut fallback, mut outbox) = setup();
        let auto = RoomConfig {
            auto_delete: true,
            ..Default::default()
        };
        rooms.create_room(&mut outbox, "from", Value::Null, auto);
        rooms.create_room(&mut outbox, "to", Value::Null, RoomConfig::default());
        for id in ["a", "b", "c"] {
            rooms.add_client(&mut fallback, &mut outbox, id, "from").unwrap();
        }

        assert_eq!(
            rooms.transfer_clients(&mut fallback, &mut outbox, "from", "to"),
            Ok(3)
        );
        assert!(rooms.get("from").is_none());
        assert_eq!(rooms.get("to").unwrap().members().len(), 3);
    }

    #[test]
    fn test_broadcast_params() {
        let (mut rooms, mut fallback, mut outbox) = setup();
        rooms.create_room(&mut outbox, "r", Value::Null, RoomConfig::default());
        rooms.add_client(&mut fallback, &mut outbox, "a", "r").unwrap();
        rooms.set_params("r", serde_json::json!({"level": 3})).unwrap();

        let mut outbox = Outbox::default();
        assert_eq!(rooms.broadcast_params(&mut outbox, "r"), Ok(1));
        assert_eq!(
            events_to(&outbox, "a")[0],
            &Envelope::new(InternalEvent::RoomParams, serde_json::json!({"level": 3}))
        );
        assert!(rooms.broadcast_params(&mut outbox, "nope").is_err());
    }
}
