//! Connecta 信令服务
//!
//! 基于 WebSocket 的房间、信令转发与服务端中继
//!
//! # 模块结构
//!
//! ## 协议层
//! - [`codec`]: 类型化字节数组编解码
//! - [`wire`]: 文本/二进制帧的分类与 JSON 消息体
//!
//! ## 状态
//! - [`registry`]: 连接注册表
//! - [`room`]: 房间目录与句柄分配
//! - [`fallback`]: 中继路由
//! - [`hub`]: 协议分发器与应用层 API
//!
//! ## 服务
//! - [`server`]: WebSocket 连接处理
//! - [`admin`]: 管理接口与负载上报
//! - [`axum_router`]: Axum 路由

pub mod admin;
pub mod codec;
pub mod events;
pub mod fallback;
pub mod hub;
pub mod registry;
pub mod room;
pub mod server;
pub mod wire;

// Axum router integration
pub mod axum_router;

pub use axum_router::{create_admin_router, create_connection_router, create_signaling_router};

// Re-export commonly used types
pub use admin::{AdminHandler, HubAdmin, LoadReporter, LocalLoad, WorkerLoad};
pub use codec::{ByteKind, CodecError, TypedArray};
pub use events::HubEvent;
pub use hub::{ClientBinding, Hub, HubOptions};
pub use registry::{ChannelSink, ClientSink, ConnectionRegistry, SendOutcome, SinkCommand};
pub use room::{RoomConfig, RoomError};
pub use server::{ConnectionHandler, SignalingServer, handle_websocket_connection};
pub use wire::{Envelope, EventName, Frame, InternalEvent, WireFormat};
