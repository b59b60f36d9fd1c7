use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use dashboard_core::{Task, TaskFilter, TaskStatus};
use serde::Deserialize;
use tracing::info;

use crate::{
    error::{ApiError, ApiResult},
    response::{created, success, success_with_message, PaginatedResponse},
    routes::AppState,
};

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;

/// 任务创建请求
///
/// `task_type` 原样保存，未知类型在执行时失败。
#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    #[serde(default)]
    pub user_id: i64,
    pub name: String,
    pub task_type: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

/// 任务查询参数
#[derive(Debug, Deserialize)]
pub struct TaskQueryParams {
    pub user_id: Option<i64>,
    pub status: Option<String>,
    pub task_type: Option<String>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

/// 创建并提交任务
pub async fn create_task(
    State(state): State<AppState>,
    Json(request): Json<CreateTaskRequest>,
) -> ApiResult<impl IntoResponse> {
    if request.name.trim().is_empty() {
        return Err(ApiError::BadRequest("任务名称不能为空".to_string()));
    }
    if request.task_type.trim().is_empty() {
        return Err(ApiError::BadRequest("任务类型不能为空".to_string()));
    }

    let config = if request.config.is_null() {
        serde_json::json!({})
    } else {
        request.config
    };
    let task = Task::with_raw_type(request.user_id, request.name, request.task_type, config);
    let task = state.task_manager.create_and_submit(task).await?;

    info!("任务已提交: ID {}, 类型: {}", task.id, task.task_type);
    Ok(created(task))
}

/// 获取任务列表
pub async fn list_tasks(
    State(state): State<AppState>,
    Query(params): Query<TaskQueryParams>,
) -> ApiResult<impl IntoResponse> {
    let page = params.page.unwrap_or(1).max(1);
    let page_size = params
        .page_size
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let status = params
        .status
        .as_deref()
        .map(str::parse::<TaskStatus>)
        .transpose()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let filter = TaskFilter {
        user_id: params.user_id,
        status,
        task_type: params.task_type,
        limit: Some(page_size),
        offset: Some((page - 1) * page_size),
    };
    let result = state.task_manager.list(&filter).await?;

    Ok(success(PaginatedResponse::new(
        result.tasks,
        result.total,
        page,
        page_size,
    )))
}

/// 获取单个任务状态
pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let info = state.task_manager.status(id).await?;
    Ok(success(info))
}

pub async fn cancel_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    state.task_manager.cancel(id).await?;
    let info = state.task_manager.status(id).await?;
    Ok(success_with_message(info, "任务已取消"))
}

pub async fn pause_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    state.task_manager.pause(id).await?;
    let info = state.task_manager.status(id).await?;
    Ok(success_with_message(info, "任务已暂停"))
}

pub async fn resume_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    state.task_manager.resume(id).await?;
    let info = state.task_manager.status(id).await?;
    Ok(success_with_message(info, "任务已恢复"))
}
