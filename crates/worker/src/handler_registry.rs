use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashboard_core::{TaskHandler, TaskType};

use crate::handlers::SimulatedHandler;

/// 任务类型到处理器的固定分派表
///
/// 在任务管理器创建前构建，之后只读。
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskType, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册处理器，同类型的旧处理器被替换
    pub fn register(&mut self, handler: Arc<dyn TaskHandler>) -> &mut Self {
        self.handlers.insert(handler.task_type(), handler);
        self
    }

    pub fn with_handler(mut self, handler: Arc<dyn TaskHandler>) -> Self {
        self.register(handler);
        self
    }

    /// 所有任务类型都使用内置的模拟处理器
    pub fn simulated(step_delay: Duration) -> Self {
        TaskType::ALL.into_iter().fold(Self::new(), |registry, task_type| {
            registry.with_handler(Arc::new(SimulatedHandler::new(task_type, step_delay)))
        })
    }

    pub fn get(&self, task_type: TaskType) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(&task_type).cloned()
    }

    pub fn contains(&self, task_type: TaskType) -> bool {
        self.handlers.contains_key(&task_type)
    }

    pub fn task_types(&self) -> Vec<TaskType> {
        let mut types: Vec<_> = self.handlers.keys().copied().collect();
        types.sort_by_key(|t| t.as_str());
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulated_registry_covers_every_type() {
        let registry = HandlerRegistry::simulated(Duration::ZERO);
        assert_eq!(registry.len(), TaskType::ALL.len());
        for task_type in TaskType::ALL {
            let handler = registry.get(task_type).unwrap();
            assert_eq!(handler.task_type(), task_type);
        }
    }

    #[test]
    fn empty_registry_has_no_handlers() {
        let registry = HandlerRegistry::new();
        assert!(registry.is_empty());
        assert!(!registry.contains(TaskType::FactorTest));
    }
}
