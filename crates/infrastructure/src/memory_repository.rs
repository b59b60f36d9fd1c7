use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashboard_core::{
    DashboardError, DashboardResult, Task, TaskFilter, TaskRepository, TaskUpdate,
};
use parking_lot::RwLock;
use tracing::debug;

/// 内存任务仓储
///
/// 默认后端，也用于测试。ID从1开始递增。
pub struct InMemoryTaskRepository {
    tasks: RwLock<BTreeMap<i64, Task>>,
    next_id: AtomicI64,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(BTreeMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.read().is_empty()
    }
}

impl Default for InMemoryTaskRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn create(&self, task: &Task) -> DashboardResult<Task> {
        let mut created = task.clone();
        created.id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        created.created_at = now;
        created.updated_at = now;

        self.tasks.write().insert(created.id, created.clone());
        debug!("创建任务成功: ID {}, 类型: {}", created.id, created.task_type);
        Ok(created)
    }

    async fn get(&self, id: i64) -> DashboardResult<Option<Task>> {
        Ok(self.tasks.read().get(&id).cloned())
    }

    async fn update_fields(&self, id: i64, update: &TaskUpdate) -> DashboardResult<()> {
        let mut tasks = self.tasks.write();
        let task = tasks
            .get_mut(&id)
            .ok_or(DashboardError::TaskNotFound { id })?;
        task.apply(update);
        Ok(())
    }

    async fn count(&self, filter: &TaskFilter) -> DashboardResult<i64> {
        let tasks = self.tasks.read();
        Ok(tasks.values().filter(|t| filter.matches(t)).count() as i64)
    }

    async fn find(&self, filter: &TaskFilter) -> DashboardResult<Vec<Task>> {
        let tasks = self.tasks.read();
        let offset = filter.offset.unwrap_or(0).max(0) as usize;
        let limit = filter.limit.map_or(usize::MAX, |l| l.max(0) as usize);

        Ok(tasks
            .values()
            .rev()
            .filter(|t| filter.matches(t))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }
}
