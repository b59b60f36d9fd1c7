//! 任务执行
//!
//! [`TaskManager`] 持有有界队列和固定数量的worker，每个任务在独立的
//! [`TaskContext`] 中运行；处理器通过 [`HandlerRegistry`] 按任务类型查找。

pub mod handler_registry;
pub mod handlers;
pub mod task_context;
pub mod task_manager;

pub use handler_registry::HandlerRegistry;
pub use handlers::SimulatedHandler;
pub use task_context::{TaskContext, TaskObserver};
pub use task_manager::TaskManager;
