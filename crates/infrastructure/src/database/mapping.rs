//! 数据库行与领域模型之间的转换工具

use chrono::{DateTime, Utc};
use dashboard_core::{DashboardError, DashboardResult, TaskStatus};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

pub struct MappingHelpers;

impl MappingHelpers {
    pub fn database_error(e: sqlx::Error) -> DashboardError {
        DashboardError::Database(e.to_string())
    }

    pub fn parse_json(row: &SqliteRow, field_name: &str) -> DashboardResult<serde_json::Value> {
        let json_str: String = row.try_get(field_name).map_err(Self::database_error)?;
        serde_json::from_str(&json_str)
            .map_err(|e| DashboardError::Serialization(format!("解析{field_name}失败: {e}")))
    }

    pub fn parse_optional_json(
        row: &SqliteRow,
        field_name: &str,
    ) -> DashboardResult<Option<serde_json::Value>> {
        let json_str: Option<String> = row.try_get(field_name).map_err(Self::database_error)?;
        json_str
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(|e| DashboardError::Serialization(format!("解析{field_name}失败: {e}")))
    }

    pub fn parse_status(row: &SqliteRow, field_name: &str) -> DashboardResult<TaskStatus> {
        let status: String = row.try_get(field_name).map_err(Self::database_error)?;
        status.parse()
    }

    pub fn parse_progress(row: &SqliteRow, field_name: &str) -> DashboardResult<u8> {
        let progress: i64 = row.try_get(field_name).map_err(Self::database_error)?;
        Ok(progress.clamp(0, 100) as u8)
    }

    pub fn parse_timestamp(
        row: &SqliteRow,
        field_name: &str,
    ) -> DashboardResult<Option<DateTime<Utc>>> {
        row.try_get(field_name).map_err(Self::database_error)
    }
}
