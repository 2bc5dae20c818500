//! Axum Router 集成
//!
//! 客户端 WebSocket 路由与管理接口路由分开创建，由调用方合并到同一个监听器上。

use axum::{
    Json, Router,
    extract::{
        ConnectInfo, State,
        ws::{WebSocket, WebSocketUpgrade},
    },
    http::{Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
};
use connecta_common::config::SignalingConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use crate::admin::{AdminHandler, HubAdmin, LoadReporter, parse_admin_path};
use crate::server::{ConnectionHandler, SignalingServer, handle_websocket_connection};

/// WebSocket 路由状态
#[derive(Clone)]
pub struct ConnectionState {
    pub handler: Arc<dyn ConnectionHandler>,
}

/// 管理接口路由状态
#[derive(Clone)]
pub struct AdminState {
    pub root_key: Arc<str>,
    pub admin: Arc<dyn AdminHandler>,
    pub load: Arc<dyn LoadReporter>,
}

/// 创建客户端 WebSocket 路由
///
/// 服务时需要 `into_make_service_with_connect_info::<SocketAddr>()`。
pub fn create_connection_router(ws_path: &str, handler: Arc<dyn ConnectionHandler>) -> Router {
    Router::new()
        .route(ws_path, get(websocket_handler))
        .with_state(ConnectionState { handler })
}

/// 创建管理接口路由：`GET /load` 与 `POST /<root_key>/...`
///
/// 管理请求通过 fallback 处理，同一个 Router 中不能再有其他 fallback。
pub fn create_admin_router(
    root_key: &str,
    admin: Arc<dyn AdminHandler>,
    load: Arc<dyn LoadReporter>,
) -> Router {
    Router::new()
        .route("/load", get(load_handler))
        .fallback(admin_handler)
        .with_state(AdminState {
            root_key: Arc::from(root_key),
            admin,
            load,
        })
}

/// 创建单进程信令服务的完整路由
pub fn create_signaling_router(
    config: &SignalingConfig,
    server: SignalingServer,
    load: Arc<dyn LoadReporter>,
) -> Router {
    info!("Creating Signaling Axum router on {}", config.ws_path);

    let admin = Arc::new(HubAdmin::new(server.clone(), load.clone()));
    let root_key = if config.is_admin_enabled() {
        config.admin_root_key.trim()
    } else {
        ""
    };

    create_connection_router(&config.ws_path, Arc::new(server))
        .merge(create_admin_router(root_key, admin, load))
}

/// WebSocket 升级处理器
async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<ConnectionState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    let client_ip = addr.ip();
    ws.on_upgrade(move |socket| handle_websocket(socket, state, client_ip))
}

async fn handle_websocket(socket: WebSocket, state: ConnectionState, client_ip: std::net::IpAddr) {
    info!("📡 新 WebSocket 连接: IP={}", client_ip);
    handle_websocket_connection(socket, state.handler, Some(client_ip)).await;
}

async fn load_handler(State(state): State<AdminState>) -> impl IntoResponse {
    Json(state.load.server_load().await)
}

/// 非 POST、密钥错误或未知方法均返回空响应体
async fn admin_handler(State(state): State<AdminState>, method: Method, uri: Uri) -> Response {
    if method != Method::POST {
        return StatusCode::OK.into_response();
    }
    let Some((name, args)) = parse_admin_path(uri.path(), &state.root_key) else {
        return StatusCode::OK.into_response();
    };

    match state.admin.call(&name, &args).await {
        Some(value) => Json(value).into_response(),
        None => StatusCode::OK.into_response(),
    }
}
