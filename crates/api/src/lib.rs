//! # Dashboard API
//!
//! 基于Axum的HTTP接口：任务提交与控制、WebSocket实时推送、健康检查和Prometheus指标。
//!
//! ## API 端点
//!
//! - `GET /health` - 健康检查
//! - `GET /metrics` - Prometheus指标
//! - `GET /ws?user_id=N` - WebSocket升级，进入客户端会话
//! - `GET /api/tasks` - 分页查询任务
//! - `POST /api/tasks` - 创建并提交任务
//! - `GET /api/tasks/{id}` - 任务状态
//! - `POST /api/tasks/{id}/cancel` - 取消任务
//! - `POST /api/tasks/{id}/pause` - 暂停任务
//! - `POST /api/tasks/{id}/resume` - 恢复任务
//!
//! ## 错误响应
//!
//! ```json
//! {
//!   "success": false,
//!   "error": { "message": "任务 ID 7 不存在", "type": "TASK_NOT_FOUND", "code": 404 },
//!   "timestamp": "2024-01-01T00:00:00Z"
//! }
//! ```

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;

use axum::Router;
use tower::ServiceBuilder;

use middleware::{cors_layer, request_logging, trace_layer};
pub use routes::{create_routes, AppState};

/// 创建完整的API应用
pub fn create_app(state: AppState) -> Router {
    create_routes(state).layer(
        ServiceBuilder::new()
            .layer(trace_layer())
            .layer(cors_layer())
            .layer(axum::middleware::from_fn(request_logging)),
    )
}
