use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use dashboard_core::{
    DashboardError, DashboardResult, Task, TaskFilter, TaskRepository, TaskUpdate,
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::{debug, instrument};

use crate::database::mapping::MappingHelpers;

const TASK_COLUMNS: &str = "id, user_id, name, task_type, status, progress, config, result, \
     error, started_at, ended_at, created_at, updated_at";

pub struct SqliteTaskRepository {
    pool: SqlitePool,
}

impl SqliteTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// 创建嵌入式SQLite任务仓库，自动初始化数据库
    pub async fn new_embedded(database_url: &str, max_connections: u32) -> DashboardResult<Self> {
        debug!("Creating embedded SQLite task repository at: {}", database_url);

        // 启用WAL模式，文件不存在时自动创建
        let connect_options = SqliteConnectOptions::from_str(database_url)
            .map_err(MappingHelpers::database_error)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .min_connections(1)
            .connect_with(connect_options)
            .await
            .map_err(MappingHelpers::database_error)?;

        Self::run_migrations(&pool).await?;

        debug!("Successfully created embedded SQLite task repository");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// 运行数据库迁移
    async fn run_migrations(pool: &SqlitePool) -> DashboardResult<()> {
        debug!("Running SQLite database migrations");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL DEFAULT 0,
                name TEXT NOT NULL,
                task_type TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'queued',
                progress INTEGER NOT NULL DEFAULT 0,
                config TEXT NOT NULL DEFAULT '{}',
                result TEXT,
                error TEXT,
                started_at TEXT,
                ended_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await
        .map_err(MappingHelpers::database_error)?;

        let indexes = [
            "CREATE INDEX IF NOT EXISTS idx_tasks_user_id ON tasks(user_id)",
            "CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status)",
            "CREATE INDEX IF NOT EXISTS idx_tasks_task_type ON tasks(task_type)",
        ];

        for index_sql in indexes {
            sqlx::query(index_sql)
                .execute(pool)
                .await
                .map_err(MappingHelpers::database_error)?;
        }

        debug!("Successfully completed SQLite database migrations");
        Ok(())
    }

    pub async fn health_check(&self) -> DashboardResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(MappingHelpers::database_error)?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn row_to_task(row: &SqliteRow) -> DashboardResult<Task> {
        Ok(Task {
            id: row.try_get("id").map_err(MappingHelpers::database_error)?,
            user_id: row.try_get("user_id").map_err(MappingHelpers::database_error)?,
            name: row.try_get("name").map_err(MappingHelpers::database_error)?,
            task_type: row
                .try_get("task_type")
                .map_err(MappingHelpers::database_error)?,
            status: MappingHelpers::parse_status(row, "status")?,
            progress: MappingHelpers::parse_progress(row, "progress")?,
            config: MappingHelpers::parse_json(row, "config")?,
            result: MappingHelpers::parse_optional_json(row, "result")?,
            error: row.try_get("error").map_err(MappingHelpers::database_error)?,
            started_at: MappingHelpers::parse_timestamp(row, "started_at")?,
            ended_at: MappingHelpers::parse_timestamp(row, "ended_at")?,
            created_at: row
                .try_get("created_at")
                .map_err(MappingHelpers::database_error)?,
            updated_at: row
                .try_get("updated_at")
                .map_err(MappingHelpers::database_error)?,
        })
    }

    fn push_filter<'a>(builder: &mut QueryBuilder<'a, Sqlite>, filter: &'a TaskFilter) {
        builder.push(" WHERE 1 = 1");
        if let Some(user_id) = filter.user_id {
            builder.push(" AND user_id = ").push_bind(user_id);
        }
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(task_type) = &filter.task_type {
            builder.push(" AND task_type = ").push_bind(task_type.as_str());
        }
    }
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    #[instrument(skip(self, task), fields(task_type = %task.task_type, user_id = task.user_id))]
    async fn create(&self, task: &Task) -> DashboardResult<Task> {
        let config_json = serde_json::to_string(&task.config)?;
        let result_json = task.result.as_ref().map(serde_json::to_string).transpose()?;
        let now = Utc::now();

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO tasks (user_id, name, task_type, status, progress, config, result,
                               error, started_at, ended_at, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(task.user_id)
        .bind(&task.name)
        .bind(&task.task_type)
        .bind(task.status.as_str())
        .bind(i64::from(task.progress))
        .bind(config_json)
        .bind(result_json)
        .bind(&task.error)
        .bind(task.started_at)
        .bind(task.ended_at)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(MappingHelpers::database_error)?;

        let created = Self::row_to_task(&row)?;
        debug!("创建任务成功: ID {}, 类型: {}", created.id, created.task_type);
        Ok(created)
    }

    #[instrument(skip(self), fields(task_id = %id))]
    async fn get(&self, id: i64) -> DashboardResult<Option<Task>> {
        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(MappingHelpers::database_error)?;

        match row {
            Some(row) => Ok(Some(Self::row_to_task(&row)?)),
            None => {
                debug!("查询任务不存在: ID {}", id);
                Ok(None)
            }
        }
    }

    #[instrument(skip(self, update), fields(task_id = %id))]
    async fn update_fields(&self, id: i64, update: &TaskUpdate) -> DashboardResult<()> {
        let result_json = update
            .result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let mut builder = QueryBuilder::<Sqlite>::new("UPDATE tasks SET updated_at = ");
        builder.push_bind(Utc::now());
        if let Some(status) = update.status {
            builder.push(", status = ").push_bind(status.as_str());
        }
        if let Some(progress) = update.progress {
            builder
                .push(", progress = ")
                .push_bind(i64::from(progress.min(100)));
        }
        if let Some(result_json) = result_json {
            builder.push(", result = ").push_bind(result_json);
        }
        if let Some(error) = &update.error {
            builder.push(", error = ").push_bind(error.clone());
        }
        if let Some(started_at) = update.started_at {
            builder.push(", started_at = ").push_bind(started_at);
        }
        if let Some(ended_at) = update.ended_at {
            builder.push(", ended_at = ").push_bind(ended_at);
        }
        builder.push(" WHERE id = ").push_bind(id);

        let result = builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(MappingHelpers::database_error)?;

        if result.rows_affected() == 0 {
            return Err(DashboardError::TaskNotFound { id });
        }
        Ok(())
    }

    async fn count(&self, filter: &TaskFilter) -> DashboardResult<i64> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) AS total FROM tasks");
        Self::push_filter(&mut builder, filter);

        let row = builder
            .build()
            .fetch_one(&self.pool)
            .await
            .map_err(MappingHelpers::database_error)?;
        row.try_get("total").map_err(MappingHelpers::database_error)
    }

    async fn find(&self, filter: &TaskFilter) -> DashboardResult<Vec<Task>> {
        let mut builder = QueryBuilder::<Sqlite>::new(format!("SELECT {TASK_COLUMNS} FROM tasks"));
        Self::push_filter(&mut builder, filter);
        // SQLite 的 OFFSET 必须跟在 LIMIT 之后，-1 表示不限制
        builder
            .push(" ORDER BY id DESC LIMIT ")
            .push_bind(filter.limit.unwrap_or(-1))
            .push(" OFFSET ")
            .push_bind(filter.offset.unwrap_or(0).max(0));

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(MappingHelpers::database_error)?;

        rows.iter().map(Self::row_to_task).collect()
    }
}
