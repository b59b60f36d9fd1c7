//! 数据仓储层接口定义
//!
//! 任务实体由外部存储持有，任务管理器只通过此接口读写：
//! - 创建任务并分配ID
//! - 按ID读取
//! - 字段级更新（只写入状态、进度、结果、错误和时间字段）
//! - 按过滤条件计数与分页查询
//!
//! 所有操作都是异步的，返回 `DashboardResult<T>`，实现必须是 `Send + Sync`。
//!
//! ## 使用示例
//!
//! ```rust,ignore
//! use dashboard_core::models::{Task, TaskStatus, TaskType, TaskUpdate};
//! use dashboard_core::traits::TaskRepository;
//!
//! async fn mark_running(repo: &dyn TaskRepository) -> DashboardResult<()> {
//!     let task = repo.create(&Task::new(1, "训练", TaskType::ModelTraining, json!({}))).await?;
//!     repo.update_fields(task.id, &TaskUpdate::status(TaskStatus::Running).started_now())
//!         .await
//! }
//! ```

use async_trait::async_trait;

use crate::errors::DashboardResult;
use crate::models::{Task, TaskFilter, TaskUpdate};

/// 任务仓储接口
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// 持久化新任务，返回带有存储分配ID的任务
    async fn create(&self, task: &Task) -> DashboardResult<Task>;

    /// 根据ID获取任务
    async fn get(&self, id: i64) -> DashboardResult<Option<Task>>;

    /// 字段级更新
    ///
    /// 任务不存在时返回 `TaskNotFound`。
    async fn update_fields(&self, id: i64, update: &TaskUpdate) -> DashboardResult<()>;

    /// 统计满足过滤条件的任务数量（忽略分页参数）
    async fn count(&self, filter: &TaskFilter) -> DashboardResult<i64>;

    /// 按过滤条件查询，按ID倒序，应用 limit/offset
    async fn find(&self, filter: &TaskFilter) -> DashboardResult<Vec<Task>>;
}
