use thiserror::Error;

use crate::models::TaskStatus;

/// 仪表盘核心错误类型定义
#[derive(Debug, Error)]
pub enum DashboardError {
    #[error("task queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("task manager is shutting down")]
    ManagerShuttingDown,

    #[error("unsupported task type: {0}")]
    UnsupportedTaskType(String),

    #[error("task not found: {id}")]
    TaskNotFound { id: i64 },

    #[error("task {id} is already active")]
    TaskAlreadyActive { id: i64 },

    #[error("task {id} cannot {action} while {status}")]
    InvalidTaskState {
        id: i64,
        status: TaskStatus,
        action: &'static str,
    },

    /// 领域处理器返回的错误，只会作为任务状态持久化，不会返回给提交者
    #[error("handler error: {0}")]
    Handler(String),

    #[error("task cancelled")]
    Cancelled,

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl DashboardError {
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler(message.into())
    }

    /// 调用方可以立即感知的错误（同步返回）
    pub fn is_synchronous(&self) -> bool {
        matches!(
            self,
            Self::QueueFull { .. }
                | Self::ManagerShuttingDown
                | Self::TaskNotFound { .. }
                | Self::TaskAlreadyActive { .. }
                | Self::InvalidTaskState { .. }
        )
    }
}

impl From<serde_json::Error> for DashboardError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// 统一的Result类型
pub type DashboardResult<T> = std::result::Result<T, DashboardError>;
