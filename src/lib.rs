//! # connecta
//!
//! WebSocket 信令与服务端中继服务器，可按 master/worker 方式分片到多个进程

pub mod error;
pub mod process;
pub mod service;

// Re-export commonly used types
pub use connecta_common::config::ConnectaConfig;
pub use process::{PidFileGuard, ProcessManager, WorkerSpawner};
pub use service::{ServiceContainer, ServiceManager};
