use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use dashboard_hub::Hub;
use dashboard_worker::TaskManager;
use metrics_exporter_prometheus::PrometheusHandle;

use crate::handlers::{
    health::health_check,
    metrics::render_metrics,
    tasks::{cancel_task, create_task, get_task, list_tasks, pause_task, resume_task},
    ws::ws_upgrade,
};

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub task_manager: Arc<TaskManager>,
    pub hub: Arc<Hub>,
    /// 关闭指标时为 `None`
    pub metrics: Option<PrometheusHandle>,
}

/// 创建API路由
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(render_metrics))
        // 实时推送
        .route("/ws", get(ws_upgrade))
        // 任务管理API
        .route("/api/tasks", get(list_tasks).post(create_task))
        .route("/api/tasks/{id}", get(get_task))
        .route("/api/tasks/{id}/cancel", post(cancel_task))
        .route("/api/tasks/{id}/pause", post(pause_task))
        .route("/api/tasks/{id}/resume", post(resume_task))
        .with_state(state)
}
