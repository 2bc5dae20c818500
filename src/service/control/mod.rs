//! 控制通道服务
//!
//! master 监听私有 TCP 端口接收 worker 注册；worker 主动连接 master。

mod master;
mod worker;

pub use master::MasterService;
pub use worker::WorkerLinkService;
