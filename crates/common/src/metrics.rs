//! Prometheus 监控指标模块
//!
//! 提供全局指标收集和导出功能

use lazy_static::lazy_static;
use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use std::sync::Once;

static METRICS_INIT: Once = Once::new();

lazy_static! {
    /// 全局 Prometheus Registry
    pub static ref REGISTRY: Registry = Registry::new();

    /// 当前 WebSocket 连接数
    pub static ref CONNECTIONS: IntGauge = IntGauge::new(
        "connecta_connections",
        "Number of active client connections"
    ).unwrap();

    /// 当前房间数（含根房间）
    pub static ref ROOMS: IntGauge = IntGauge::new(
        "connecta_rooms",
        "Number of rooms"
    ).unwrap();

    /// 入站消息计数（按类型分组）
    pub static ref MESSAGES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("connecta_messages_total", "Total number of inbound client messages"),
        &["kind"]
    ).unwrap();

    /// 服务端中继转发的帧数
    pub static ref RELAYED_FRAMES_TOTAL: IntCounter = IntCounter::new(
        "connecta_relayed_frames_total",
        "Total number of frames relayed through the server"
    ).unwrap();

    /// 已注册的 worker 进程数
    pub static ref WORKERS: IntGauge = IntGauge::new(
        "connecta_workers",
        "Number of registered worker processes"
    ).unwrap();

    /// 重定向次数
    pub static ref REDIRECTS_TOTAL: IntCounter = IntCounter::new(
        "connecta_redirects_total",
        "Total number of clients redirected to a worker"
    ).unwrap();
}

/// 注册所有指标到全局 Registry
///
/// This function is idempotent - calling it multiple times is safe.
pub fn register_metrics() -> Result<(), prometheus::Error> {
    let mut result = Ok(());

    METRICS_INIT.call_once(|| {
        let register_result = (|| {
            REGISTRY.register(Box::new(CONNECTIONS.clone()))?;
            REGISTRY.register(Box::new(ROOMS.clone()))?;
            REGISTRY.register(Box::new(MESSAGES_TOTAL.clone()))?;
            REGISTRY.register(Box::new(RELAYED_FRAMES_TOTAL.clone()))?;
            REGISTRY.register(Box::new(WORKERS.clone()))?;
            REGISTRY.register(Box::new(REDIRECTS_TOTAL.clone()))?;
            Ok::<(), prometheus::Error>(())
        })();

        if let Err(e) = register_result {
            result = Err(e);
        }
    });

    result
}

/// 记录一条入站消息
pub fn record_message(kind: &str) {
    MESSAGES_TOTAL.with_label_values(&[kind]).inc();
}

/// 导出 Prometheus 格式的指标
pub fn export_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!("Failed to encode metrics: {}", e);
    }

    String::from_utf8_lossy(&buffer).into_owned()
}
