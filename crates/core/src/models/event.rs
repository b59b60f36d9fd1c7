use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::task::TaskStatus;

/// 已知事件类型
pub mod event_types {
    pub const TASK_PROGRESS: &str = "task_progress";
    pub const TASK_STATUS: &str = "task_status";
    pub const TASK_COMPLETED: &str = "task_completed";
    pub const SYSTEM_ALERT: &str = "system_alert";
    pub const SYSTEM_STATUS: &str = "system_status";
    pub const NOTIFICATION: &str = "notification";
}

/// 事件分类
///
/// 未知分类保留原始字符串，广播器按用户范围或全体广播处理。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventCategory {
    Task,
    Factor,
    Model,
    Strategy,
    Workflow,
    System,
    Notification,
    Other(String),
}

impl EventCategory {
    pub fn as_str(&self) -> &str {
        match self {
            EventCategory::Task => "task",
            EventCategory::Factor => "factor",
            EventCategory::Model => "model",
            EventCategory::Strategy => "strategy",
            EventCategory::Workflow => "workflow",
            EventCategory::System => "system",
            EventCategory::Notification => "notification",
            EventCategory::Other(s) => s,
        }
    }

    /// 分类对应的实体ID字段名
    pub fn id_field(&self) -> Option<&'static str> {
        match self {
            EventCategory::Task => Some("task_id"),
            EventCategory::Factor => Some("factor_id"),
            EventCategory::Model => Some("model_id"),
            EventCategory::Strategy => Some("strategy_id"),
            EventCategory::Workflow => Some("workflow_id"),
            _ => None,
        }
    }
}

impl From<String> for EventCategory {
    fn from(s: String) -> Self {
        match s.as_str() {
            "task" => EventCategory::Task,
            "factor" => EventCategory::Factor,
            "model" => EventCategory::Model,
            "strategy" => EventCategory::Strategy,
            "workflow" => EventCategory::Workflow,
            "system" => EventCategory::System,
            "notification" => EventCategory::Notification,
            _ => EventCategory::Other(s),
        }
    }
}

impl From<&str> for EventCategory {
    fn from(s: &str) -> Self {
        EventCategory::from(s.to_string())
    }
}

impl From<EventCategory> for String {
    fn from(c: EventCategory) -> Self {
        c.as_str().to_string()
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 生命周期事件
///
/// `user_id` 为 0 表示全局事件；`timestamp` 在发布时重新赋值。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_type: String,
    pub category: EventCategory,
    pub payload: Map<String, Value>,
    pub user_id: i64,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(
        event_type: impl Into<String>,
        category: impl Into<EventCategory>,
        user_id: i64,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            category: category.into(),
            payload: Map::new(),
            user_id,
            timestamp: Utc::now(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }

    pub fn with_payload(mut self, payload: Map<String, Value>) -> Self {
        self.payload.extend(payload);
        self
    }

    /// 从载荷中提取分类对应的实体ID
    pub fn entity_id(&self) -> Option<Value> {
        self.category
            .id_field()
            .and_then(|field| self.payload.get(field))
            .cloned()
    }

    pub fn is_global(&self) -> bool {
        self.user_id == 0
    }

    pub fn task_progress(user_id: i64, task_id: i64, progress: u8) -> Self {
        Self::new(event_types::TASK_PROGRESS, EventCategory::Task, user_id)
            .with_field("task_id", json!(task_id))
            .with_field("progress", json!(progress))
    }

    pub fn task_status(
        user_id: i64,
        task_id: i64,
        status: TaskStatus,
        error: Option<&str>,
    ) -> Self {
        let event = Self::new(event_types::TASK_STATUS, EventCategory::Task, user_id)
            .with_field("task_id", json!(task_id))
            .with_field("status", json!(status));
        match error {
            Some(error) => event.with_field("error", json!(error)),
            None => event,
        }
    }

    pub fn task_completed(user_id: i64, task_id: i64, result: &Value) -> Self {
        Self::new(event_types::TASK_COMPLETED, EventCategory::Task, user_id)
            .with_field("task_id", json!(task_id))
            .with_field("status", json!(TaskStatus::Completed))
            .with_field("result", result.clone())
    }

    /// 全局系统告警
    pub fn system_alert(level: &str, message: &str) -> Self {
        Self::new(event_types::SYSTEM_ALERT, EventCategory::System, 0)
            .with_field("level", json!(level))
            .with_field("message", json!(message))
    }

    pub fn system_status(status: Map<String, Value>) -> Self {
        Self::new(event_types::SYSTEM_STATUS, EventCategory::System, 0).with_payload(status)
    }

    pub fn notification(user_id: i64, title: &str, message: &str) -> Self {
        Self::new(event_types::NOTIFICATION, EventCategory::Notification, user_id)
            .with_field("title", json!(title))
            .with_field("message", json!(message))
    }
}
