//! 管理接口
//!
//! `POST /<root_key>/<method>/<args…>` 被分发到 [`AdminHandler`]，
//! 处理器返回 JSON 时以 200 + JSON 响应，否则返回空响应体。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, info};

use crate::codec::ByteKind;
use crate::room::RoomConfig;
use crate::server::SignalingServer;
use crate::wire::EventName;

/// 管理方法处理器
#[async_trait]
pub trait AdminHandler: Send + Sync + 'static {
    async fn call(&self, method: &str, args: &[String]) -> Option<Value>;
}

/// 单个进程的负载
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerLoad {
    pub pid: u32,
    pub host: String,
    pub port: u16,
    pub clients: usize,
}

/// 负载上报
#[async_trait]
pub trait LoadReporter: Send + Sync + 'static {
    async fn server_load(&self) -> Vec<WorkerLoad>;
}

/// 单进程模式：把自己作为唯一条目上报
#[derive(Debug, Clone)]
pub struct LocalLoad {
    server: SignalingServer,
    host: String,
    port: u16,
}

impl LocalLoad {
    pub fn new(server: SignalingServer, host: impl Into<String>, port: u16) -> Self {
        Self {
            server,
            host: host.into(),
            port,
        }
    }
}

#[async_trait]
impl LoadReporter for LocalLoad {
    async fn server_load(&self) -> Vec<WorkerLoad> {
        vec![WorkerLoad {
            pid: std::process::id(),
            host: self.host.clone(),
            port: self.port,
            clients: self.server.hub().lock().await.peer_count(),
        }]
    }
}

/// 拆分管理路径，根密钥不匹配或缺少方法名时返回 `None`
pub fn parse_admin_path(path: &str, root_key: &str) -> Option<(String, Vec<String>)> {
    if root_key.is_empty() {
        return None;
    }
    let mut segments = path
        .trim_start_matches('/')
        .split('/')
        .filter(|s| !s.is_empty());

    if segments.next()? != root_key {
        return None;
    }
    let method = segments.next()?.to_string();
    Some((method, segments.map(str::to_string).collect()))
}

/// 内置的管理方法，直接操作 Hub
pub struct HubAdmin {
    server: SignalingServer,
    load: Arc<dyn LoadReporter>,
}

impl HubAdmin {
    pub fn new(server: SignalingServer, load: Arc<dyn LoadReporter>) -> Self {
        Self { server, load }
    }

    /// `createRoom/<name>/<flag>…`，flag 为 rtc、fallback、autoDelete、silent 或字节类型名
    fn room_config(base: RoomConfig, flags: &[String]) -> RoomConfig {
        flags.iter().fold(base, |mut config, flag| {
            match flag.as_str() {
                "rtc" => config.use_rtc = true,
                "fallback" => config.fallback = true,
                "autoDelete" => config.auto_delete = true,
                "silent" => config.silent = true,
                other => match other.parse::<ByteKind>() {
                    Ok(kind) => config.byte_kind = kind,
                    Err(_) => debug!("忽略未知房间选项 {}", other),
                },
            }
            config
        })
    }
}

#[async_trait]
impl AdminHandler for HubAdmin {
    async fn call(&self, method: &str, args: &[String]) -> Option<Value> {
        info!("🛠️ 管理请求 {} {:?}", method, args);
        let arg = |i: usize| args.get(i).map(String::as_str);

        if method == "load" {
            return serde_json::to_value(self.load.server_load().await).ok();
        }

        let mut hub = self.server.hub().lock().await;
        let result = match method {
            "createRoom" => {
                let name = arg(0)?;
                let config = Self::room_config(hub.default_room_config(), &args[1..]);
                json!({ "created": hub.create_room(name, Value::Null, config) })
            }
            "deleteRoom" => match hub.delete_room(arg(0)?) {
                Ok(deleted) => json!({ "deleted": deleted }),
                Err(e) => json!({ "error": e.to_string() }),
            },
            "addClient" => match hub.add_client_to_room(arg(0)?, arg(1)?) {
                Ok(handle) => json!({ "rtcId": handle }),
                Err(e) => json!({ "error": e.to_string() }),
            },
            "removeClient" => match hub.remove_client_from_room(arg(0)?) {
                Ok(()) => json!({ "room": hub.rooms().root() }),
                Err(e) => json!({ "error": e.to_string() }),
            },
            "broadcastParams" => match hub.broadcast_room_params(arg(0)?) {
                Ok(sent) => json!({ "sent": sent }),
                Err(e) => json!({ "error": e.to_string() }),
            },
            "rooms" => json!(hub.room_names()),
            "roomClients" => json!(hub.room_clients(arg(0)?)?),
            "peers" => json!(hub.peers()),
            "send" => {
                let (id, ev) = (arg(0)?, arg(1)?);
                let data = arg(2).map_or(Value::Null, |raw| {
                    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
                });
                let outcome = hub.send_event(id, EventName::from(ev), data);
                json!({ "delivered": outcome == crate::registry::SendOutcome::Delivered })
            }
            _ => {
                debug!("未知管理方法 {}", method);
                return None;
            }
        };
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::HubOptions;
    use crate::registry::ChannelSink;
    use tokio::sync::mpsc;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn admin() -> (SignalingServer, HubAdmin) {
        let server = SignalingServer::new(HubOptions::default());
        let load = Arc::new(LocalLoad::new(server.clone(), "127.0.0.1", 8080));
        (server.clone(), HubAdmin::new(server, load))
    }

    #[test]
    fn test_parse_admin_path() {
        assert_eq!(
            parse_admin_path("/secret/addClient/abc/lobby", "secret"),
            Some(("addClient".to_string(), args(&["abc", "lobby"])))
        );
        assert_eq!(
            parse_admin_path("/secret/rooms/", "secret"),
            Some(("rooms".to_string(), vec![]))
        );
        assert_eq!(parse_admin_path("/wrong/rooms", "secret"), None);
        assert_eq!(parse_admin_path("/secret", "secret"), None);
        assert_eq!(parse_admin_path("//rooms", ""), None);
    }

    #[tokio::test]
    async fn test_room_methods() {
        let (server, admin) = admin();

        assert_eq!(
            admin
                .call("createRoom", &args(&["game", "rtc", "fallback", "int16"]))
                .await,
            Some(json!({"created": true}))
        );
        {
            let hub = server.hub().lock().await;
            let config = hub.rooms().get("game").unwrap().config();
            assert!(config.use_rtc && config.fallback && !config.silent);
            assert_eq!(config.byte_kind, ByteKind::Int16);
        }

        assert_eq!(
            admin.call("rooms", &[]).await,
            Some(json!(["/", "game"]))
        );
        assert_eq!(
            admin.call("deleteRoom", &args(&["/"])).await,
            Some(json!({"error": "the root room cannot be deleted"}))
        );
        assert_eq!(
            admin.call("deleteRoom", &args(&["game"])).await,
            Some(json!({"deleted": true}))
        );
        assert_eq!(admin.call("roomClients", &args(&["game"])).await, None);
        assert_eq!(admin.call("nope", &[]).await, None);
        assert_eq!(admin.call("addClient", &args(&["only-id"])).await, None);
    }

    #[tokio::test]
    async fn test_client_methods_and_load() {
        let (server, admin) = admin();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = server
            .hub()
            .lock()
            .await
            .connect(Arc::new(ChannelSink::new(tx)), None);
        rx.recv().await;

        admin.call("createRoom", &args(&["lobby"])).await;
        assert_eq!(
            admin.call("addClient", &args(&[id.as_str(), "lobby"])).await,
            Some(json!({"rtcId": null}))
        );
        assert_eq!(
            admin.call("roomClients", &args(&["lobby"])).await,
            Some(json!([id]))
        );
        assert_eq!(
            admin.call("removeClient", &args(&[id.as_str()])).await,
            Some(json!({"room": "/"}))
        );
        assert_eq!(admin.call("peers", &[]).await, Some(json!([id])));

        assert_eq!(
            admin.call("send", &args(&[id.as_str(), "score", "{\"n\":1}"])).await,
            Some(json!({"delivered": true}))
        );

        let load = admin.call("load", &[]).await.unwrap();
        assert_eq!(load[0]["clients"], 1);
        assert_eq!(load[0]["port"], 8080);
    }
}
