//! 多进程分片配置
//!
//! master 进程通过私有控制通道接收 worker 注册，并把新连接重定向到负载最低的 worker。

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CoordinatorConfig {
    /// 是否将客户端连接分片到多个 worker 进程
    #[serde(default)]
    pub divide_connections: bool,

    /// 分片时是否由 master 自动拉起 worker 进程
    #[serde(default = "default_true")]
    pub spawn_workers: bool,

    /// worker 进程数量，0 表示使用 CPU 核数
    #[serde(default)]
    pub workers: usize,

    /// master 控制通道监听地址
    #[serde(default = "default_master_ip")]
    pub master_ip: String,

    /// master 控制通道端口
    #[serde(default = "default_master_port")]
    pub master_port: u16,

    /// 重定向时告知客户端的主机名
    #[serde(default = "default_client_host")]
    pub client_host: String,

    /// 自动拉起的 worker 客户端端口基数，0 表示随机端口
    #[serde(default)]
    pub worker_base_port: u16,

    /// worker 与 master 断开后的重连间隔（秒），0 表示不重连
    #[serde(default = "default_reconnect_secs")]
    pub reconnect_secs: u64,

    /// 重定向消息发出后关闭连接前的等待时间（毫秒）
    #[serde(default = "default_redirect_delay_ms")]
    pub redirect_delay_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            divide_connections: false,
            spawn_workers: true,
            workers: 0,
            master_ip: default_master_ip(),
            master_port: default_master_port(),
            client_host: default_client_host(),
            worker_base_port: 0,
            reconnect_secs: default_reconnect_secs(),
            redirect_delay_ms: default_redirect_delay_ms(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_master_ip() -> String {
    "127.0.0.1".to_string()
}

fn default_master_port() -> u16 {
    9870
}

fn default_client_host() -> String {
    "127.0.0.1".to_string()
}

fn default_reconnect_secs() -> u64 {
    3
}

fn default_redirect_delay_ms() -> u64 {
    1000
}

impl CoordinatorConfig {
    /// master 控制通道地址
    pub fn master_addr(&self) -> String {
        format!("{}:{}", self.master_ip, self.master_port)
    }

    /// 实际 worker 数量
    pub fn worker_count(&self, cpus: usize) -> usize {
        if self.workers == 0 {
            cpus.max(1)
        } else {
            self.workers
        }
    }

    pub(crate) fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.master_ip.parse::<std::net::IpAddr>().is_err() {
            errors.push(format!(
                "Invalid coordinator.master_ip '{}', must be a valid IP address",
                self.master_ip
            ));
        }

        if self.client_host.trim().is_empty() {
            errors.push("coordinator.client_host cannot be empty".to_string());
        }

        if self.divide_connections && self.master_port == 0 {
            errors.push("coordinator.master_port must be set when divide_connections is enabled".to_string());
        }

        if self.divide_connections && self.redirect_delay_ms > 10_000 {
            errors.push(format!(
                "Warning: coordinator.redirect_delay_ms = {} delays every redirected client",
                self.redirect_delay_ms
            ));
        }

        errors
    }
}
