use std::sync::Arc;

use anyhow::{Context, Result};
use dashboard_api::{create_app, AppState};
use dashboard_core::AppConfig;
use dashboard_events::EventBroadcaster;
use dashboard_hub::Hub;
use dashboard_infrastructure::{create_task_repository, install_metrics_recorder};
use dashboard_worker::{HandlerRegistry, TaskManager};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::{net::TcpListener, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// 主应用程序
///
/// 组装连接中心、事件广播器、任务管理器和HTTP服务，并负责按顺序关闭它们。
pub struct Application {
    config: AppConfig,
    hub: Arc<Hub>,
    task_manager: Arc<TaskManager>,
    metrics: Option<PrometheusHandle>,
    hub_shutdown: CancellationToken,
    hub_handle: JoinHandle<()>,
}

impl Application {
    /// 创建新的应用实例
    pub async fn new(config: AppConfig) -> Result<Self> {
        info!(
            "初始化应用程序: workers={}, queue_capacity={}, database={:?}",
            config.task_manager.workers, config.task_manager.queue_capacity, config.database.backend
        );

        let metrics = if config.observability.metrics_enabled {
            Some(install_metrics_recorder()?)
        } else {
            None
        };

        let hub = Arc::new(Hub::new(config.hub.clone()));
        let hub_shutdown = CancellationToken::new();
        let hub_handle = hub
            .start(hub_shutdown.clone())
            .await
            .context("启动连接中心失败")?;

        let publisher = Arc::new(EventBroadcaster::new(Arc::clone(&hub)));
        let repository = create_task_repository(&config.database)
            .await
            .context("创建任务存储失败")?;
        let handlers = HandlerRegistry::simulated(config.task_manager.simulated_step_delay());

        let task_manager = Arc::new(TaskManager::new(
            config.task_manager.clone(),
            repository,
            publisher,
            handlers,
        ));
        task_manager.start().await.context("启动任务管理器失败")?;

        Ok(Self {
            config,
            hub,
            task_manager,
            metrics,
            hub_shutdown,
            hub_handle,
        })
    }

    /// 运行HTTP服务，直到 `shutdown` 被取消
    ///
    /// 关闭顺序：停止接收请求，取消任务并发布终态事件，最后关闭连接中心。
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let bind_address = self.config.api.bind_address.clone();
        let listener = TcpListener::bind(&bind_address)
            .await
            .with_context(|| format!("绑定地址失败: {bind_address}"))?;
        info!("API服务器启动在: {}", bind_address);

        let app = create_app(AppState {
            task_manager: Arc::clone(&self.task_manager),
            hub: Arc::clone(&self.hub),
            metrics: self.metrics.clone(),
        });

        let server_shutdown = shutdown.clone();
        let served = axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
            .await;
        if let Err(e) = &served {
            error!("API服务器运行失败: {e}");
        }

        self.task_manager.shutdown().await;

        self.hub_shutdown.cancel();
        if let Err(e) = self.hub_handle.await {
            warn!("连接中心控制循环异常退出: {e}");
        }

        info!("应用程序已停止");
        served.context("API服务器运行失败")
    }
}
