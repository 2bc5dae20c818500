//! HTTP服务模块
//!
//! 管理客户端 WebSocket 监听器上的各个路由服务

mod redirect;
mod signaling;
mod worker;

pub use redirect::RedirectService;
pub use signaling::SignalingService;
pub use worker::WorkerService;

/// 健康检查端点
async fn health() -> &'static str {
    "OK"
}
