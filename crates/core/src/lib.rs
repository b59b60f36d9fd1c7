//! 任务执行与实时事件分发的核心抽象：数据模型、错误类型、配置以及各组件之间的接口。

pub mod config;
pub mod errors;
pub mod models;
pub mod progress;
pub mod traits;

pub use config::{AppConfig, DatabaseBackend, HubConfig, TaskManagerConfig};
pub use errors::*;
pub use models::{
    Event, EventCategory, Task, TaskFilter, TaskOutcome, TaskPage, TaskStatus, TaskStatusInfo,
    TaskType, TaskUpdate,
};
pub use traits::{EventPublisher, ExecutionScope, ProgressSink, TaskHandler, TaskRepository};
