use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use dashboard_core::DashboardError;
use serde_json::json;
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("仪表盘错误: {0}")]
    Dashboard(#[from] DashboardError),

    #[error("请求参数错误: {0}")]
    BadRequest(String),

    #[error("未找到资源")]
    NotFound,
}

impl ApiError {
    fn parts(&self) -> (StatusCode, String, &'static str) {
        match self {
            ApiError::Dashboard(e) => match e {
                DashboardError::TaskNotFound { id } => (
                    StatusCode::NOT_FOUND,
                    format!("任务 ID {id} 不存在"),
                    "TASK_NOT_FOUND",
                ),
                DashboardError::QueueFull { .. } => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    e.to_string(),
                    "QUEUE_FULL",
                ),
                DashboardError::ManagerShuttingDown => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    e.to_string(),
                    "SHUTTING_DOWN",
                ),
                DashboardError::TaskAlreadyActive { .. } => {
                    (StatusCode::CONFLICT, e.to_string(), "TASK_ALREADY_ACTIVE")
                }
                DashboardError::InvalidTaskState { .. } => {
                    (StatusCode::CONFLICT, e.to_string(), "INVALID_TASK_STATE")
                }
                DashboardError::UnsupportedTaskType(_) => (
                    StatusCode::BAD_REQUEST,
                    e.to_string(),
                    "UNSUPPORTED_TASK_TYPE",
                ),
                _ => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "系统内部错误".to_string(),
                    "INTERNAL_ERROR",
                ),
            },
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                format!("请求参数错误: {msg}"),
                "BAD_REQUEST",
            ),
            ApiError::NotFound => (
                StatusCode::NOT_FOUND,
                "请求的资源不存在".to_string(),
                "NOT_FOUND",
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, error_type) = self.parts();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {}", self);
        }

        let body = Json(json!({
            "success": false,
            "error": {
                "message": message,
                "type": error_type,
                "code": status.as_u16(),
            },
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
