//! 中继路由
//!
//! 维护每个客户端无法直连、需要经服务端转发的对端集合。
//! 关系是对称的：B 在 A 的集合中当且仅当 A 在 B 的集合中。

use serde_json::json;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

use crate::hub::Outbox;
use crate::room::RoomDirectory;
use crate::wire::{Envelope, Frame, InternalEvent, MessageType, RelayPayload};

#[derive(Debug, Default)]
pub struct FallbackRouter {
    relays: HashMap<String, BTreeSet<String>>,
}

impl FallbackRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 客户端当前的中继对端（有序）
    pub fn relay_set(&self, id: &str) -> Vec<String> {
        self.relays
            .get(id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn size(&self, id: &str) -> usize {
        self.relays.get(id).map_or(0, BTreeSet::len)
    }

    pub fn contains(&self, a: &str, b: &str) -> bool {
        self.relays.get(a).is_some_and(|set| set.contains(b))
    }

    fn link(&mut self, a: &str, b: &str) -> bool {
        let added = self
            .relays
            .entry(a.to_string())
            .or_default()
            .insert(b.to_string());
        self.relays
            .entry(b.to_string())
            .or_default()
            .insert(a.to_string());
        added
    }

    fn unlink(&mut self, a: &str, b: &str) -> bool {
        let removed = self.remove_one(a, b);
        self.remove_one(b, a);
        removed
    }

    fn remove_one(&mut self, from: &str, peer: &str) -> bool {
        let Some(set) = self.relays.get_mut(from) else {
            return false;
        };
        let removed = set.remove(peer);
        if set.is_empty() {
            self.relays.remove(from);
        }
        removed
    }

    fn notify(&self, outbox: &mut Outbox, ids: &BTreeSet<String>) {
        for id in ids {
            outbox.send(
                id,
                Envelope::new(InternalEvent::FallbackListSize, json!(self.size(id))),
            );
            outbox.touch(id);
        }
    }

    /// 标记 a、b 之间无法直连
    ///
    /// 仅当两者位于同一个启用中继的房间时生效。
    pub fn mark_unreachable(
        &mut self,
        rooms: &RoomDirectory,
        outbox: &mut Outbox,
        a: &str,
        b: &str,
    ) -> bool {
        self.mark_unreachable_many(rooms, outbox, a, &[b.to_string()]) > 0
    }

    /// 列表形式：每个受影响的客户端只收到一次列表大小通知
    ///
    /// # 返回
    /// 新建立的中继对数
    pub fn mark_unreachable_many(
        &mut self,
        rooms: &RoomDirectory,
        outbox: &mut Outbox,
        id: &str,
        others: &[String],
    ) -> usize {
        let mut affected = BTreeSet::new();
        for other in others {
            if other == id || !rooms.share_fallback_room(id, other) {
                continue;
            }
            if self.link(id, other) {
                affected.insert(other.clone());
            }
        }

        if !affected.is_empty() {
            debug!("🔀 {} 新增 {} 个中继对端", id, affected.len());
            let pairs = affected.len();
            affected.insert(id.to_string());
            self.notify(outbox, &affected);
            pairs
        } else {
            0
        }
    }

    /// 标记 a、b 之间已能直连
    pub fn mark_reachable(&mut self, outbox: &mut Outbox, a: &str, b: &str) -> bool {
        if !self.unlink(a, b) {
            return false;
        }
        let affected = BTreeSet::from([a.to_string(), b.to_string()]);
        self.notify(outbox, &affected);
        true
    }

    /// 清空客户端的中继集合（离开房间或断开连接）
    pub fn mark_reachable_all(&mut self, outbox: &mut Outbox, id: &str) {
        let Some(peers) = self.relays.remove(id) else {
            return;
        };
        for peer in &peers {
            self.remove_one(peer, id);
        }
        debug!("🔀 清空 {} 的 {} 个中继对端", id, peers.len());

        let mut affected = peers;
        affected.insert(id.to_string());
        self.notify(outbox, &affected);
    }

    /// 将中继负载转发给发送者中继集合中的每个对端
    ///
    /// 文本原样转发；二进制数组的末尾两个槽位改写为发送者句柄与中继标记。
    ///
    /// # 返回
    /// 转发的帧数
    pub fn forward(
        &self,
        rooms: &RoomDirectory,
        outbox: &mut Outbox,
        from: &str,
        payload: RelayPayload,
    ) -> usize {
        let Some(peers) = self.relays.get(from) else {
            debug!("客户端 {} 没有中继对端，丢弃中继负载", from);
            return 0;
        };

        let frame = match payload {
            RelayPayload::Text(text) => Frame::Text(text),
            RelayPayload::Binary(mut arr) => {
                let handle = rooms.handle_of(from).unwrap_or_default();
                arr.retag(handle, MessageType::FallbackRelay.code());
                Frame::Binary(arr.to_bytes())
            }
        };

        for peer in peers {
            outbox.send_frame(peer, frame.clone());
        }
        peers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{ByteKind, TypedArray};
    use crate::hub::Outgoing;
    use crate::room::RoomConfig;
    use serde_json::Value;

    fn fallback_room() -> (RoomDirectory, FallbackRouter, Outbox) {
        let mut rooms = RoomDirectory::new("/", true, ByteKind::Uint8);
        let mut outbox = Outbox::default();
        let config = RoomConfig {
            use_rtc: true,
            fallback: true,
            silent: true,
            ..Default::default()
        };
        rooms.create_room(&mut outbox, "mesh", Value::Null, config);
        rooms.create_room(&mut outbox, "plain", Value::Null, RoomConfig::default());
        (rooms, FallbackRouter::new(), Outbox::default())
    }

    fn sizes_sent_to(outbox: &Outbox, id: &str) -> Vec<Value> {
        outbox
            .deliveries()
            .iter()
            .filter(|(to, _)| to == id)
            .filter_map(|(_, out)| match out {
                Outgoing::Event(env)
                    if env.ev.internal() == Some(InternalEvent::FallbackListSize) =>
                {
                    Some(env.data.clone())
                }
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_join_seeds_symmetric_pairs() {
        let (mut rooms, mut fallback, mut outbox) = fallback_room();
        for id in ["a", "b", "c"] {
            rooms.add_client(&mut fallback, &mut outbox, id, "mesh").unwrap();
        }

        assert_eq!(fallback.relay_set("a"), vec!["b", "c"]);
        assert_eq!(fallback.relay_set("c"), vec!["a", "b"]);
        for (a, b) in [("a", "b"), ("a", "c"), ("b", "c")] {
            assert!(fallback.contains(a, b) && fallback.contains(b, a));
        }
    }

    #[test]
    fn test_non_fallback_room_seeds_nothing() {
        let (mut rooms, mut fallback, mut outbox) = fallback_room();
        rooms.add_client(&mut fallback, &mut outbox, "a", "plain").unwrap();
        rooms.add_client(&mut fallback, &mut outbox, "b", "plain").unwrap();

        assert_eq!(fallback.size("a"), 0);
        assert!(!fallback.mark_unreachable(&rooms, &mut outbox, "a", "b"));
    }

    #[test]
    fn test_unreachable_requires_same_room() {
        let (mut rooms, mut fallback, mut outbox) = fallback_room();
        rooms.add_client(&mut fallback, &mut outbox, "a", "mesh").unwrap();
        rooms.add_client(&mut fallback, &mut outbox, "b", "/").unwrap();

        assert!(!fallback.mark_unreachable(&rooms, &mut outbox, "a", "b"));
        assert!(!fallback.mark_unreachable(&rooms, &mut outbox, "a", "a"));
        assert_eq!(fallback.size("a"), 0);
    }

    #[test]
    fn test_reachable_and_size_notifications() {
        let (mut rooms, mut fallback, mut outbox) = fallback_room();
        rooms.add_client(&mut fallback, &mut outbox, "a", "mesh").unwrap();
        rooms.add_client(&mut fallback, &mut outbox, "b", "mesh").unwrap();
        rooms.add_client(&mut fallback, &mut outbox, "c", "mesh").unwrap();

        let mut outbox = Outbox::default();
        assert!(fallback.mark_reachable(&mut outbox, "a", "b"));
        assert!(!fallback.mark_reachable(&mut outbox, "a", "b"));
        assert_eq!(sizes_sent_to(&outbox, "a"), vec![json!(1)]);
        assert_eq!(sizes_sent_to(&outbox, "b"), vec![json!(1)]);
        assert!(sizes_sent_to(&outbox, "c").is_empty());

        let mut outbox = Outbox::default();
        assert!(fallback.mark_unreachable(&rooms, &mut outbox, "b", "a"));
        assert_eq!(sizes_sent_to(&outbox, "a"), vec![json!(2)]);
    }

    #[test]
    fn test_leaving_clears_both_directions() {
        let (mut rooms, mut fallback, mut outbox) = fallback_room();
        for id in ["a", "b", "c"] {
            rooms.add_client(&mut fallback, &mut outbox, id, "mesh").unwrap();
        }

        let mut outbox = Outbox::default();
        rooms.add_client(&mut fallback, &mut outbox, "a", "/").unwrap();
        assert_eq!(fallback.size("a"), 0);
        assert_eq!(fallback.relay_set("b"), vec!["c"]);
        assert_eq!(sizes_sent_to(&outbox, "a"), vec![json!(0)]);
        assert_eq!(sizes_sent_to(&outbox, "c"), vec![json!(1)]);
    }

    #[test]
    fn test_forward_text_and_binary() {
        let (mut rooms, mut fallback, mut outbox) = fallback_room();
        for id in ["a", "b", "c"] {
            rooms.add_client(&mut fallback, &mut outbox, id, "mesh").unwrap();
        }

        let mut outbox = Outbox::default();
        let sent = fallback.forward(
            &rooms,
            &mut outbox,
            "b",
            RelayPayload::Text("{\"x\":1}".to_string()),
        );
        assert_eq!(sent, 2);
        assert_eq!(
            outbox.deliveries()[0],
            (
                "a".to_string(),
                Outgoing::Frame(Frame::Text("{\"x\":1}".to_string()))
            )
        );

        // 客户端声称的句柄 99 被改写为服务端分配的 2
        let mut outbox = Outbox::default();
        let arr = TypedArray::new(ByteKind::Uint8, vec![5.0, 6.0, 99.0, 2.0]);
        fallback.forward(&rooms, &mut outbox, "b", RelayPayload::Binary(arr));
        let Outgoing::Frame(Frame::Binary(bytes)) = &outbox.deliveries()[1].1 else {
            panic!("expected binary frame");
        };
        assert_eq!(bytes.as_ref(), &[5, 6, 2, 2]);
    }

    #[test]
    fn test_forward_without_relays_drops() {
        let (rooms, fallback, _) = fallback_room();
        let mut outbox = Outbox::default();
        let sent = fallback.forward(&rooms, &mut outbox, "a", RelayPayload::Text("x".into()));
        assert_eq!(sent, 0);
        assert!(outbox.deliveries().is_empty());
    }
}
