//! Process management module
//!
//! Handles the PID file and the worker child processes of a sharded master

use anyhow::{Context, Result};
use connecta_common::config::ConnectaConfig;
use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// worker 异常退出后的重启间隔
const RESPAWN_DELAY: Duration = Duration::from_secs(1);

/// Process management utilities
pub struct ProcessManager;

impl ProcessManager {
    /// Write PID file
    pub fn write_pid_file(pid_path: Option<&str>) -> Result<Option<PathBuf>> {
        let Some(path_str) = pid_path else {
            return Ok(None);
        };
        let path = Path::new(path_str);

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create PID file directory: {parent:?}"))?;
        }

        let pid = std::process::id();
        let mut file =
            fs::File::create(path).with_context(|| format!("Failed to create PID file: {path:?}"))?;
        writeln!(file, "{pid}").with_context(|| format!("Failed to write PID to file: {path:?}"))?;

        info!("PID file written: {:?} (PID: {})", path, pid);
        Ok(Some(path.to_path_buf()))
    }

    /// Remove PID file
    pub fn remove_pid_file(pid_path: Option<&PathBuf>) {
        if let Some(path) = pid_path {
            if let Err(e) = fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove PID file {:?}: {}", path, e);
                }
            } else {
                info!("PID file removed: {:?}", path);
            }
        }
    }
}

/// Guard to ensure PID file is removed on drop
pub struct PidFileGuard {
    path: Option<PathBuf>,
}

impl PidFileGuard {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }
}

impl Drop for PidFileGuard {
    fn drop(&mut self) {
        ProcessManager::remove_pid_file(self.path.as_ref());
    }
}

/// 由 master 拉起并看护的 worker 子进程
///
/// 每个 worker 以 `<exe> --config <path> worker --port <n>` 启动，
/// 退出后自动重启，收到关闭信号时全部终止。
#[derive(Debug, Clone)]
pub struct WorkerSpawner {
    program: PathBuf,
    config_path: PathBuf,
    base_port: u16,
    count: usize,
}

impl WorkerSpawner {
    pub fn new(config_path: &Path, config: &ConnectaConfig) -> Result<Self> {
        let program = std::env::current_exe().context("Failed to locate current executable")?;
        Ok(Self {
            program,
            config_path: config_path.to_path_buf(),
            base_port: config.coordinator.worker_base_port,
            count: config.coordinator.worker_count(num_cpus::get()),
        })
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// 第 `index` 个 worker 的客户端端口，基数为 0 时由系统分配
    pub fn worker_port(&self, index: usize) -> u16 {
        if self.base_port == 0 {
            0
        } else {
            self.base_port.saturating_add(index as u16)
        }
    }

    pub fn worker_args(&self, index: usize) -> Vec<OsString> {
        vec![
            "--config".into(),
            self.config_path.clone().into_os_string(),
            "worker".into(),
            "--port".into(),
            self.worker_port(index).to_string().into(),
        ]
    }

    /// 启动全部 worker，每个 worker 由独立任务看护
    pub fn spawn_all(&self, shutdown_tx: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        info!("🧩 启动 {} 个 worker 进程", self.count);
        (0..self.count)
            .map(|index| {
                let program = self.program.clone();
                let args = self.worker_args(index);
                let shutdown_rx = shutdown_tx.subscribe();
                tokio::spawn(supervise(program, args, shutdown_rx))
            })
            .collect()
    }
}

/// 运行子进程直到收到关闭信号，异常退出时重启
async fn supervise(program: PathBuf, args: Vec<OsString>, mut shutdown_rx: broadcast::Receiver<()>) {
    loop {
        let mut child = match Command::new(&program).args(&args).kill_on_drop(true).spawn() {
            Ok(child) => child,
            Err(e) => {
                error!("❌ 无法启动 worker 进程 {:?}: {}", program, e);
                return;
            }
        };
        info!("🧩 worker 进程已启动 (PID: {:?})", child.id());

        tokio::select! {
            status = child.wait() => {
                match status {
                    Ok(status) => warn!("⚠️ worker 进程退出: {}，{:?} 后重启", status, RESPAWN_DELAY),
                    Err(e) => warn!("⚠️ 等待 worker 进程失败: {}，{:?} 后重启", e, RESPAWN_DELAY),
                }
            }
            _ = shutdown_rx.recv() => {
                if let Err(e) = child.kill().await {
                    warn!("终止 worker 进程失败: {}", e);
                }
                return;
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(RESPAWN_DELAY) => {}
            _ = shutdown_rx.recv() => return,
        }
    }
}
