//! Coordinator - Connecta 多进程分片
//!
//! 一个 master 进程持有全部房间与中继状态，多个 worker 进程各自承载一部分
//! WebSocket 连接。master 的公开端口只做重定向：把新连接指向当前连接数最少的 worker。
//!
//! # Architecture
//!
//! ```text
//!   client ──ws──► master (redirect) ──{ev:-1, url}──► client
//!   client ──ws──► worker ◄──── control channel (TCP, Ʃ…Ƶ 帧) ────► master (Hub)
//! ```
//!
//! - **worker**: 本地完成 SDP/ICE 改写、中继扇出与心跳，其余消息原样上送 master
//! - **master**: 把远端客户端登记进 [`signaling::Hub`]，出站消息经控制通道下发给 worker
//!
//! # Components
//!
//! - [`frame`]: 控制通道分帧编解码
//! - [`protocol`]: 控制消息
//! - [`master`]: master 侧控制通道监听与远端客户端登记
//! - [`worker`]: worker 侧连接处理与到 master 的重连
//! - [`redirect`]: master 公开端口的最小负载重定向

pub mod error;
pub mod frame;
pub mod master;
pub mod protocol;
pub mod redirect;
pub mod worker;

pub use error::{CoordinatorError, Result};
pub use frame::{ControlCodec, END_MARKER, FrameError, START_MARKER};
pub use master::{MasterCoordinator, WorkerSink};
pub use protocol::{ClientPayload, ControlEvent, ControlMessage, RelayFailUpdate, RelayReport, WorkerHello};
pub use redirect::{RedirectHandler, pick_least_loaded};
pub use worker::{WorkerLink, WorkerOptions};
