//! 服务管理器模块 - 负责管理多个服务的生命周期

use crate::service::container::ServiceContainer;
use crate::service::trace::http_trace_layer;
use anyhow::{Context, Result};
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use connecta_common::{ServiceCollector, ServiceInfo, TlsConfigurer, config::ConnectaConfig};
use std::net::SocketAddr;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};
use url::Url;

/// 服务管理器，负责管理多个服务的生命周期
#[derive(Debug)]
pub struct ServiceManager {
    services: Vec<ServiceContainer>,
    shutdown_tx: tokio::sync::broadcast::Sender<()>,
    service_collector: ServiceCollector,
    config: ConnectaConfig,
    /// 预先绑定的客户端监听器（worker 需要在注册前知道自己的端口）
    listener: Option<std::net::TcpListener>,
}

/// 客户端监听器的绑定方案
struct ListenPlan {
    bind_addr: String,
    public_url: Url,
    tls_config: Option<RustlsConfig>,
}

impl ServiceManager {
    /// 创建新的服务管理器
    pub fn new(config: ConnectaConfig, shutdown_tx: tokio::sync::broadcast::Sender<()>) -> Self {
        Self {
            services: Vec::new(),
            shutdown_tx,
            service_collector: ServiceCollector::new(),
            config,
            listener: None,
        }
    }

    /// 使用已绑定的监听器替代 `bind` 配置中的地址
    pub fn with_listener(mut self, listener: std::net::TcpListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// 添加服务到管理器
    pub fn add_service(&mut self, service: ServiceContainer) {
        info!("Adding service '{}' to manager", service.info().name);
        self.services.push(service);
    }

    /// 启动所有服务
    ///
    /// 先启动合并后的 HTTP 监听器，再依次启动控制通道服务。
    pub async fn start_all(&mut self) -> Result<Vec<JoinHandle<()>>> {
        info!(
            "Starting {} services ({})",
            self.services.len(),
            self.services
                .iter()
                .map(|s| s.info().service_type.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );

        let services = std::mem::take(&mut self.services);
        let mut http_services = Vec::new();
        let mut control_services = Vec::new();

        for service in services {
            if service.is_http_router() {
                http_services.push(service);
            } else if service.is_control() {
                control_services.push(service);
            }
        }

        let mut handle_futs = Vec::new();
        if !http_services.is_empty() {
            handle_futs.push(self.start_http_services(http_services).await?);
        }

        for service in control_services {
            handle_futs.push(self.start_control_service(service).await?);
        }

        for info in self.service_collector.values().await {
            info!("  ✅ {} ({}) -> {}", info.name, info.service_type, info.url());
        }

        Ok(handle_futs)
    }

    /// 根据运行环境确定绑定地址、对外 URL 与 TLS 配置
    async fn listen_plan(&self) -> Result<ListenPlan> {
        let is_dev = self.config.is_dev();

        if is_dev && let Some(ref http_config) = self.config.bind.http {
            // 开发环境优先使用HTTP
            let public_url = Url::parse(&format!(
                "http://{}:{}",
                http_config.domain_name, http_config.port
            ))
            .context("Failed to parse HTTP URL")?;
            return Ok(ListenPlan {
                bind_addr: format!("{}:{}", http_config.ip, http_config.port),
                public_url,
                tls_config: None,
            });
        }

        let Some(ref https_config) = self.config.bind.https else {
            return Err(anyhow::anyhow!(if is_dev {
                "No HTTP or HTTPS binding configuration found"
            } else {
                "HTTPS binding configuration is required for production environment"
            }));
        };

        let public_url = Url::parse(&format!(
            "https://{}:{}",
            https_config.domain_name, https_config.port
        ))
        .context("Failed to parse HTTPS URL")?;

        let server_config = TlsConfigurer::create_shared_config(&https_config.cert, &https_config.key)
            .with_context(|| {
                format!(
                    "Failed to load TLS certificate {} / key {}",
                    https_config.cert, https_config.key
                )
            })?;
        let tls_config = RustlsConfig::from_config(server_config);

        Ok(ListenPlan {
            bind_addr: format!("{}:{}", https_config.ip, https_config.port),
            public_url,
            tls_config: Some(tls_config),
        })
    }

    /// 启动HTTP服务器，合并所有HTTP路由服务
    async fn start_http_services(
        &mut self,
        mut services: Vec<ServiceContainer>,
    ) -> Result<JoinHandle<()>> {
        let ListenPlan {
            bind_addr,
            mut public_url,
            tls_config,
        } = self.listen_plan().await?;
        let protocol = if tls_config.is_some() {
            "HTTPS"
        } else {
            "HTTP"
        };

        info!(
            "Starting {} server with {} route services (environment: {})",
            protocol,
            services.len(),
            self.config.env
        );

        let listener = self.listener.take();
        let addr: SocketAddr = match &listener {
            Some(listener) => {
                listener.set_nonblocking(true)?;
                let local = listener.local_addr()?;
                let _ = public_url.set_port(Some(local.port()));
                local
            }
            None => bind_addr
                .parse()
                .with_context(|| format!("Invalid bind address '{bind_addr}'"))?,
        };

        // 构建合并的路由器
        let mut app = Router::new();
        for service in &mut services {
            let Some(route_prefix) = service.route_prefix().map(str::to_string) else {
                continue;
            };
            let service_name = service.info().name.clone();

            match service.build_router().await {
                Some(Ok(router)) => {
                    info!(
                        "Adding route '{}' for service '{}'",
                        route_prefix, service_name
                    );
                    app = if route_prefix == "/" {
                        app.merge(router)
                    } else {
                        app.nest(&route_prefix, router)
                    };

                    if let Some(Err(e)) = service.on_start(public_url.clone()).await {
                        error!("Failed to start service '{}': {:?}", service_name, e);
                    }
                    self.service_collector
                        .insert(service_name, service.info().clone())
                        .await;
                }
                Some(Err(e)) => {
                    error!(
                        "Failed to build router for service '{}': {:?}",
                        service_name, e
                    );
                }
                None => {}
            }
        }
        self.services.extend(services);

        // 添加全局 Prometheus metrics 端点
        info!("Adding /metrics endpoint for Prometheus");
        app = app
            .route("/metrics", axum::routing::get(metrics_handler))
            .layer(http_trace_layer())
            .layer(CorsLayer::permissive());

        info!("{} server listening on {}", protocol, addr);

        let shutdown_tx = self.shutdown_tx.clone();
        let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
        let fut = if let Some(tls_config) = tls_config {
            let server = match listener {
                Some(listener) => axum_server::from_tcp_rustls(listener, tls_config),
                None => axum_server::bind_rustls(addr, tls_config),
            }
            .serve(make_service);
            tokio::spawn(async move {
                let mut shutdown_rx = shutdown_tx.subscribe();
                tokio::select! {
                    result = server => {
                        if let Err(e) = result {
                            error!("HTTPS server error: {}", e);
                            let _ = shutdown_tx.send(());
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("HTTPS server received shutdown signal");
                    }
                }
                info!("HTTPS server stopped");
            })
        } else {
            let listener = match listener {
                Some(listener) => tokio::net::TcpListener::from_std(listener)?,
                None => tokio::net::TcpListener::bind(addr)
                    .await
                    .with_context(|| format!("Failed to bind to address '{addr}'"))?,
            };

            tokio::spawn(async move {
                let mut shutdown_rx = shutdown_tx.subscribe();
                let server = axum::serve(listener, make_service).with_graceful_shutdown(
                    async move {
                        let _ = shutdown_rx.recv().await;
                        info!("HTTP server received shutdown signal");
                    },
                );
                if let Err(e) = server.await {
                    error!("HTTP server error: {}", e);
                    let _ = shutdown_tx.send(());
                }
                info!("HTTP server stopped");
            })
        };

        Ok(fut)
    }

    /// 启动单个控制通道服务，等待其就绪
    async fn start_control_service(&mut self, service: ServiceContainer) -> Result<JoinHandle<()>> {
        let service_name = service.info().name.clone();
        let Some(mut control) = service.into_control() else {
            return Err(anyhow::anyhow!(
                "Invalid service type for control service: {service_name}"
            ));
        };

        let shutdown_rx = self.shutdown_tx.subscribe();
        let shutdown_tx = self.shutdown_tx.clone();
        let (tx, rx) = tokio::sync::oneshot::channel::<ServiceInfo>();
        let handle = tokio::spawn(async move {
            if let Err(e) = control.start(shutdown_rx, tx).await {
                error!("❌ Control service '{}' failed: {:#}", control.info().name, e);
                let _ = shutdown_tx.send(());
            }
        });

        let info = rx
            .await
            .with_context(|| format!("Control service '{service_name}' failed to start"))?;
        self.service_collector.insert(info.name.clone(), info).await;
        Ok(handle)
    }

    /// Return service registry handle for accessing service statuses
    pub fn service_collector(&self) -> ServiceCollector {
        self.service_collector.clone()
    }

    /// Stop all services
    pub async fn stop_all(&mut self) -> Result<()> {
        info!("Stopping all services");

        let _ = self.shutdown_tx.send(());
        for service in &mut self.services {
            if let Some(Err(e)) = service.on_stop().await {
                warn!("Failed to stop service '{}': {:?}", service.info().name, e);
            }
        }

        info!("All services stopped");
        Ok(())
    }
}

/// Prometheus metrics endpoint handler
async fn metrics_handler() -> String {
    connecta_common::metrics::export_metrics()
}
