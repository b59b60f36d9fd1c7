pub mod mapping;
pub mod sqlite;

use std::sync::Arc;

use dashboard_core::config::DatabaseConfig;
use dashboard_core::{DashboardResult, DatabaseBackend, TaskRepository};
use tracing::info;

use crate::memory_repository::InMemoryTaskRepository;

pub use mapping::MappingHelpers;
pub use sqlite::SqliteTaskRepository;

/// 按配置创建任务仓储
pub async fn create_task_repository(
    config: &DatabaseConfig,
) -> DashboardResult<Arc<dyn TaskRepository>> {
    match config.backend {
        DatabaseBackend::Memory => {
            info!("Using in-memory task repository");
            Ok(Arc::new(InMemoryTaskRepository::new()))
        }
        DatabaseBackend::Sqlite => {
            info!("Using SQLite task repository at {}", config.url);
            let repository =
                SqliteTaskRepository::new_embedded(&config.url, config.max_connections).await?;
            Ok(Arc::new(repository))
        }
    }
}
