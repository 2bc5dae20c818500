//! Connecta 信令服务器主程序
//!
//! 根据配置以单进程、master（分片）或 worker 方式运行

mod cli;
mod observability;

use clap::Parser;
use connecta::process::{PidFileGuard, ProcessManager, WorkerSpawner};
use connecta::service::{
    MasterService, RedirectService, ServiceContainer, ServiceManager, SignalingService,
    WorkerLinkService, WorkerService,
};
use connecta_common::config::ConnectaConfig;
use coordinator::{MasterCoordinator, WorkerLink, WorkerOptions};
use observability::init_observability;
use signaling::SignalingServer;
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use tracing::{error, info, warn};

macro_rules! bootstrap_info {
    ($($arg:tt)*) => {
        println!($($arg)*);
    };
}

macro_rules! bootstrap_error {
    ($($arg:tt)*) => {
        eprintln!($($arg)*);
    };
}

use cli::{Cli, Commands};
use connecta::error::{Error, Result};

/// 系统级配置文件位置
const SYSTEM_CONFIG_PATH: &str = "/etc/connecta/config.toml";

/// 进程的运行角色
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunMode {
    /// 单进程，或 `divide_connections = true` 时作为 master
    Serve,
    /// 由 master 拉起的 worker
    Worker { port: u16 },
}

/// Application launcher utilities
struct ApplicationLauncher;

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::Test { config_file }) => {
            let config_path =
                ApplicationLauncher::find_config_file(config_file.as_ref().unwrap_or(&cli.config))?;
            ApplicationLauncher::test_config_file(&config_path)
        }
        Some(Commands::Worker { port }) => {
            ApplicationLauncher::run(&cli.config, RunMode::Worker { port: *port })
        }
        None => ApplicationLauncher::run(&cli.config, RunMode::Serve),
    }
}

impl ApplicationLauncher {
    fn run(config: &PathBuf, mode: RunMode) -> Result<()> {
        let config_path = Self::find_config_file(config)?;

        // Create Tokio runtime（before running the application）
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;

        runtime.block_on(Self::run_application(&config_path, mode))
    }

    /// Find config file with fallback locations
    fn find_config_file(provided_path: &PathBuf) -> Result<PathBuf> {
        // If the provided path is not the default "config.toml", it must exist
        if provided_path != Path::new("config.toml") {
            if provided_path.exists() {
                bootstrap_info!("Using provided config file: {:?}", provided_path);
                return Ok(provided_path.clone());
            }
            bootstrap_error!("Provided config file not found: {:?}", provided_path);
            return Err(Error::custom(format!(
                "Config file not found: {provided_path:?}"
            )));
        }

        let fallback_paths = [
            // 1. Current working directory
            PathBuf::from("config.toml"),
            // 2. System config directory
            PathBuf::from(SYSTEM_CONFIG_PATH),
        ];

        bootstrap_info!("Searching for config file in default locations...");

        for path in &fallback_paths {
            if path.exists() {
                bootstrap_info!("Found config file: {:?}", path);
                return Ok(path.clone());
            }
            bootstrap_info!("Config not found at: {:?}", path);
        }

        bootstrap_error!("No configuration file found!");
        bootstrap_error!("Please create a config file in one of these locations:");
        for (i, path) in fallback_paths.iter().enumerate() {
            bootstrap_error!("  {}. {:?}", i + 1, path);
        }
        bootstrap_error!("Or specify a custom path with: connecta --config <path>");

        Err(Error::custom(
            "No configuration file found. Please create one or specify path with --config",
        ))
    }

    /// 测试配置文件是否有效
    fn test_config_file(config_path: &Path) -> Result<()> {
        // Initialize basic logging for test command
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_writer(std::io::stderr)
            .init();

        let config = match ConnectaConfig::from_file(config_path) {
            Ok(config) => config,
            Err(e) => {
                error!("❌ 配置文件解析失败: {}", e);
                return Err(Error::service_validation(format!("配置解析失败: {e}")));
            }
        };
        info!("✅ 配置文件解析成功: {:?}", config_path);

        if let Err(errors) = config.validate() {
            let mut has_errors = false;
            error!("❌ 配置验证发现问题:");
            for (i, err) in errors.iter().enumerate() {
                if err.starts_with("Warning:") {
                    warn!("  {}. ⚠️  {}", i + 1, err);
                } else {
                    error!("  {}. ❌ {}", i + 1, err);
                    has_errors = true;
                }
            }
            if has_errors {
                return Err(Error::service_validation("配置验证失败"));
            }
        }

        info!("✅ 配置验证通过");
        if config.is_sharded() {
            info!(
                "🧭 分片模式: {} 个 worker，控制通道 {}",
                config.coordinator.worker_count(num_cpus::get()),
                config.coordinator.master_addr()
            );
        }
        Ok(())
    }

    /// 加载并验证配置，警告不阻止启动
    fn load_config(config_path: &Path) -> Result<ConnectaConfig> {
        bootstrap_info!("📄 加载配置文件: {:?}", config_path);

        let config = ConnectaConfig::from_file(config_path).map_err(|e| {
            bootstrap_error!("❌ 配置加载失败: {}", e);
            Error::custom(format!("配置加载失败: {e}"))
        })?;
        bootstrap_info!("✅ 配置加载成功");

        if let Err(errors) = config.validate() {
            bootstrap_error!("❌ 配置验证发现问题:");
            let mut has_critical_errors = false;
            for (i, err) in errors.iter().enumerate() {
                if err.starts_with("Warning:") {
                    bootstrap_info!("  {}. ⚠️  {}", i + 1, err);
                } else {
                    bootstrap_error!("  {}. ❌ {}", i + 1, err);
                    has_critical_errors = true;
                }
            }
            if has_critical_errors {
                return Err(Error::custom("配置验证失败，请修复上述错误"));
            }
        }

        Ok(config)
    }

    /// 运行应用程序的主入口
    async fn run_application(config_path: &Path, mode: RunMode) -> Result<()> {
        let config = Self::load_config(config_path)?;

        // 初始化日志
        let _observability_guard = init_observability(&config)?;

        // worker 不写 PID 文件，避免覆盖 master 的
        let _pid_guard = match mode {
            RunMode::Serve => {
                let pid_path = ProcessManager::write_pid_file(config.get_pid_path().as_deref())?;
                Some(PidFileGuard::new(pid_path))
            }
            RunMode::Worker { .. } => None,
        };

        if let Err(e) = connecta_common::metrics::register_metrics() {
            warn!(
                "Prometheus metrics registration warning (may already be registered): {}",
                e
            );
        }

        // 初始化全局关闭通道（供所有服务共享）
        let (shutdown_tx, _) = broadcast::channel::<()>(16);
        setup_ctrl_c_handler(shutdown_tx.clone()).await;

        let mut handle_futs: Vec<JoinHandle<()>> = Vec::new();
        let mut service_manager = match mode {
            RunMode::Serve if config.is_sharded() => {
                info!("🚀 以 master 模式启动 Connecta");
                Self::master_services(&config, &shutdown_tx)
            }
            RunMode::Serve => {
                info!("🚀 以单进程模式启动 Connecta");
                let (manager, handle) = Self::standalone_services(&config, &shutdown_tx);
                handle_futs.extend(handle);
                manager
            }
            RunMode::Worker { port } => {
                info!("🚀 以 worker 模式启动 Connecta (port {})", port);
                let (manager, handle) = Self::worker_services(&config, port, &shutdown_tx)?;
                handle_futs.extend(handle);
                manager
            }
        };

        let handle_futures = service_manager.start_all().await?;
        handle_futs.extend(handle_futures);

        // 控制通道就绪后再拉起 worker
        if mode == RunMode::Serve
            && config.is_sharded()
            && config.coordinator.spawn_workers
        {
            let spawner = WorkerSpawner::new(config_path, &config)?;
            handle_futs.extend(spawner.spawn_all(&shutdown_tx));
        }

        Self::display_service_info(&config, mode);

        for handle in handle_futs {
            if let Err(e) = handle.await {
                error!("Service task terminated unexpectedly: {}", e);
                let _ = shutdown_tx.send(());
            }
        }
        service_manager.stop_all().await?;

        info!("🛑 所有服务已安全关闭");
        Ok(())
    }

    /// 单进程：客户端、应用 API 与管理接口共用一个 Hub
    fn standalone_services(
        config: &ConnectaConfig,
        shutdown_tx: &broadcast::Sender<()>,
    ) -> (ServiceManager, Option<JoinHandle<()>>) {
        let service = SignalingService::new(config.clone());
        let keepalive = service
            .server()
            .spawn_keepalive(config.signaling.keepalive_secs, shutdown_tx.subscribe());

        let mut manager = ServiceManager::new(config.clone(), shutdown_tx.clone());
        info!("  - Signaling WebSocket Service ({})", config.signaling.ws_path);
        manager.add_service(ServiceContainer::signaling(service));
        (manager, keepalive)
    }

    /// master：公开端口只做重定向，全局状态保存在 master 的 Hub 中
    fn master_services(config: &ConnectaConfig, shutdown_tx: &broadcast::Sender<()>) -> ServiceManager {
        let master = MasterCoordinator::new(SignalingServer::from_config(&config.signaling));

        let mut manager = ServiceManager::new(config.clone(), shutdown_tx.clone());
        info!("  - Redirect Service ({})", config.signaling.ws_path);
        manager.add_service(ServiceContainer::redirect(RedirectService::new(
            config.clone(),
            master.clone(),
        )));
        info!(
            "  - Coordinator Service ({})",
            config.coordinator.master_addr()
        );
        manager.add_service(ServiceContainer::master(MasterService::new(config, master)));
        manager
    }

    /// worker：先绑定客户端端口，注册时把实际端口告诉 master
    fn worker_services(
        config: &ConnectaConfig,
        port: u16,
        shutdown_tx: &broadcast::Sender<()>,
    ) -> Result<(ServiceManager, Option<JoinHandle<()>>)> {
        let ip = match (&config.bind.http, &config.bind.https) {
            (Some(http), _) if !connecta::service::uses_tls(config) => http.ip.clone(),
            (_, Some(https)) => https.ip.clone(),
            (Some(http), None) => http.ip.clone(),
            (None, None) => "0.0.0.0".to_string(),
        };
        let listener = std::net::TcpListener::bind((ip.as_str(), port)).map_err(|e| {
            Error::service_startup(format!("Failed to bind worker port {ip}:{port}: {e}"))
        })?;
        let local_port = listener.local_addr()?.port();

        let link = WorkerLink::new(WorkerOptions::from_config(config, local_port));
        let keepalive =
            link.spawn_keepalive(config.signaling.keepalive_secs, shutdown_tx.subscribe());

        let mut manager =
            ServiceManager::new(config.clone(), shutdown_tx.clone()).with_listener(listener);
        info!("  - Worker Signaling Service (port {})", local_port);
        manager.add_service(ServiceContainer::worker(WorkerService::new(
            config,
            link.clone(),
        )));
        info!("  - Worker Link -> {}", config.coordinator.master_addr());
        manager.add_service(ServiceContainer::worker_link(WorkerLinkService::new(
            config, link,
        )));
        Ok((manager, keepalive))
    }

    /// 显示服务信息
    fn display_service_info(config: &ConnectaConfig, mode: RunMode) {
        info!("✅ 所有服务已启动");

        if let RunMode::Worker { .. } = mode {
            return;
        }

        let (host, port) = connecta::service::public_host_port(config);
        let scheme = if connecta::service::uses_tls(config) {
            "wss"
        } else {
            "ws"
        };
        info!("📡 客户端接入: {}://{}:{}{}", scheme, host, port, config.signaling.ws_path);
        info!("🔧 可用的端点:");
        info!("  - /health");
        info!("  - /metrics");
        info!("  - /load");
        if config.signaling.is_admin_enabled() {
            info!("  - POST /<admin_root_key>/<method>/...");
        }
        if config.is_sharded() {
            info!(
                "🧭 控制通道: {} ({} 个 worker{})",
                config.coordinator.master_addr(),
                config.coordinator.worker_count(num_cpus::get()),
                if config.coordinator.spawn_workers {
                    "，自动拉起"
                } else {
                    "，需手动启动"
                }
            );
        }
    }
}

/// 设置Ctrl-C信号处理程序
async fn setup_ctrl_c_handler(shutdown_tx: broadcast::Sender<()>) {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("无法监听Ctrl-C信号: {}", e);
            return;
        }
        info!("收到Ctrl-C信号，开始优雅关闭...");
        let _ = shutdown_tx.send(());
    });
}
