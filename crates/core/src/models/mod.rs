//! # 数据模型
//!
//! 定义任务执行与实时事件分发子系统的核心数据结构。
//!
//! ## 核心模型
//!
//! ### Task - 任务定义
//! 一次长时间运行、可取消、可汇报进度的计算任务。实体由外部存储持有，
//! 任务管理器只修改状态、进度、结果、错误和时间字段。
//!
//! ### Event - 生命周期事件
//! 进程内发布的类型化事件，不做持久化，由事件广播器路由到连接中心和本地订阅者。
//!
//! ## 状态管理
//!
//! ### 任务状态流转
//! ```text
//! Queued → Running ⇄ Paused
//!   ↓        ↓
//! Cancelled  Completed / Failed / Cancelled
//! ```
//!
//! ## 使用示例
//!
//! ```rust
//! use dashboard_core::models::*;
//! use serde_json::json;
//!
//! let task = Task::new(42, "回测", TaskType::StrategyBacktest, json!({"strategy_id": 3}));
//! assert_eq!(task.status, TaskStatus::Queued);
//!
//! let event = Event::new(event_types::TASK_STATUS, EventCategory::Task, 42)
//!     .with_field("task_id", json!(task.id));
//! assert_eq!(event.entity_id(), Some(json!(0)));
//! ```

pub mod event;
pub mod task;

pub use event::*;
pub use task::*;
